//! The underlying binary protocol of the P018 programmer firmware

use std::fmt;

use scroll::{BE, Pread, Pwrite};

use crate::constants::{commands, tokens};
use crate::device::{ChipProfile, CoreWidth, ProgramFlags};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;

/// A jump-table command selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Leave the current command and return to the jump table.
    Reset,
    Echo,
    InitProgramVars,
    VoltagesOn,
    VoltagesOff,
    /// Power-cycle the programming rails without leaving the session.
    CycleVoltages,
    ProgramRom,
    ProgramEeprom,
    ProgramFusesId,
    ReadRom,
    ReadEeprom,
    ReadConfig,
    Erase,
    /// Blank check; ROM carries the high byte of an erased word as parameter.
    EraseCheck,
    FusesReady,
    DetectInSocket,
    DetectOutOfSocket,
    Version,
    ProtocolId,
    ProgramDebugVector,
    ReadDebugVector,
}

impl Command {
    pub const fn selector(self) -> u8 {
        match self {
            Command::Reset => commands::RESET,
            Command::Echo => commands::ECHO,
            Command::InitProgramVars => commands::INIT_PROGRAM_VARS,
            Command::VoltagesOn => commands::VOLTAGES_ON,
            Command::VoltagesOff => commands::VOLTAGES_OFF,
            Command::CycleVoltages => commands::CYCLE_VOLTAGES,
            Command::ProgramRom => commands::PROGRAM_ROM,
            Command::ProgramEeprom => commands::PROGRAM_EEPROM,
            Command::ProgramFusesId => commands::PROGRAM_FUSES_ID,
            Command::ReadRom => commands::READ_ROM,
            Command::ReadEeprom => commands::READ_EEPROM,
            Command::ReadConfig => commands::READ_CONFIG,
            Command::Erase => commands::ERASE,
            Command::EraseCheck => commands::ERASE_CHECK,
            Command::FusesReady => commands::FUSES_READY,
            Command::DetectInSocket => commands::DETECT_IN_SOCKET,
            Command::DetectOutOfSocket => commands::DETECT_OUT_OF_SOCKET,
            Command::Version => commands::VERSION,
            Command::ProtocolId => commands::PROTOCOL_ID,
            Command::ProgramDebugVector => commands::PROGRAM_DEBUG_VECTOR,
            Command::ReadDebugVector => commands::READ_DEBUG_VECTOR,
        }
    }

    pub fn from_selector(selector: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.selector() == selector)
    }

    const ALL: [Command; 21] = [
        Command::Reset,
        Command::Echo,
        Command::InitProgramVars,
        Command::VoltagesOn,
        Command::VoltagesOff,
        Command::CycleVoltages,
        Command::ProgramRom,
        Command::ProgramEeprom,
        Command::ProgramFusesId,
        Command::ReadRom,
        Command::ReadEeprom,
        Command::ReadConfig,
        Command::Erase,
        Command::EraseCheck,
        Command::FusesReady,
        Command::DetectInSocket,
        Command::DetectOutOfSocket,
        Command::Version,
        Command::ProtocolId,
        Command::ProgramDebugVector,
        Command::ReadDebugVector,
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.selector())
    }
}

/// Single-byte answer of the programmer, classified against the token the
/// running operation waits for.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Response {
    Ack,
    Nack,
    Other(u8),
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => write!(f, "ACK"),
            Response::Nack => write!(f, "NACK"),
            Response::Other(b) => write!(f, "OTHER({:02x})", b),
        }
    }
}

impl Response {
    pub fn classify(byte: u8, ack: u8) -> Self {
        if byte == ack {
            Response::Ack
        } else if byte == tokens::NACK {
            Response::Nack
        } else {
            Response::Other(byte)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ack)
    }

    /// Turn anything but the acknowledgment into an error for `operation`.
    pub fn into_result(self, operation: &'static str, expected: &'static str) -> Result<()> {
        match self {
            Response::Ack => Ok(()),
            Response::Nack => Err(Error::Nack { operation }),
            Response::Other(b) => Err(Error::unexpected(operation, expected, &[b])),
        }
    }
}

/// The 11-byte program-variables block, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramVars {
    pub rom_size: u16,
    pub eeprom_size: u16,
    pub core_type: u8,
    pub flags: ProgramFlags,
    pub program_delay: u8,
    pub power_sequence: u8,
    pub erase_mode: u8,
    pub program_tries: u8,
    pub over_program: u8,
}

impl ProgramVars {
    pub const SIZE: usize = 11;

    pub fn from_profile(chip: &ChipProfile) -> Result<Self> {
        let rom_size = u16::try_from(chip.rom_size).map_err(|_| {
            Error::SizeViolation(format!("ROM size {} words does not fit 16 bits", chip.rom_size))
        })?;
        let eeprom_size = u16::try_from(chip.eeprom_size).map_err(|_| {
            Error::SizeViolation(format!(
                "EEPROM size {} bytes does not fit 16 bits",
                chip.eeprom_size
            ))
        })?;
        Ok(ProgramVars {
            rom_size,
            eeprom_size,
            core_type: chip.core_type.code(),
            flags: chip.flags,
            program_delay: chip.program_delay,
            power_sequence: chip.power_sequence,
            erase_mode: chip.erase_mode,
            program_tries: chip.program_tries,
            over_program: chip.over_program,
        })
    }

    pub fn encode(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0u8; Self::SIZE];
        buf.pwrite_with(self.rom_size, 0, BE)?;
        buf.pwrite_with(self.eeprom_size, 2, BE)?;
        buf[4] = self.core_type;
        buf[5] = self.flags.bits();
        buf[6] = self.program_delay;
        buf[7] = self.power_sequence;
        buf[8] = self.erase_mode;
        buf[9] = self.program_tries;
        buf[10] = self.over_program;
        Ok(buf)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::SIZE {
            return Err(Error::SizeViolation(format!(
                "program variables block is {} bytes, expected {}",
                raw.len(),
                Self::SIZE
            )));
        }
        Ok(ProgramVars {
            rom_size: raw.pread_with(0, BE)?,
            eeprom_size: raw.pread_with(2, BE)?,
            core_type: raw[4],
            flags: ProgramFlags::from_bits(raw[5]),
            program_delay: raw[6],
            power_sequence: raw[7],
            erase_mode: raw[8],
            program_tries: raw[9],
            over_program: raw[10],
        })
    }
}

/// Body sent after the fuse/ID selector.
///
/// `"00"`, then the ID bytes, then either seven little-endian fuse words
/// (16-bit core) or `"FFFF"`, the first fuse word and six `0xFFFF` fillers
/// (14-bit core).
pub fn fuse_id_payload(width: CoreWidth, image: &FirmwareImage) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(b"00");
    buf.extend_from_slice(&image.id);
    match width {
        CoreWidth::Bit16 => {
            for fuse in &image.fuses {
                buf.extend_from_slice(&fuse.to_le_bytes());
            }
        }
        CoreWidth::Bit14 => {
            let first = image
                .fuses
                .first()
                .ok_or_else(|| Error::SizeViolation("no fuse word to program".into()))?;
            if image.fuses.len() > 1 {
                log::debug!("14-bit core: only the first fuse word is programmed");
            }
            buf.extend_from_slice(b"FFFF");
            buf.extend_from_slice(&first.to_le_bytes());
            for _ in 0..6 {
                buf.extend_from_slice(&0xffffu16.to_le_bytes());
            }
        }
        CoreWidth::Bit12 => {
            return Err(Error::SizeViolation(
                "12-bit cores have no fuse/ID payload".into(),
            ));
        }
    }
    Ok(buf)
}

/// Big-endian 24-bit address as sent with the debug-vector commands.
pub fn debug_vector_address(address: u32) -> Result<[u8; 3]> {
    if address > 0x00ff_ffff {
        return Err(Error::SizeViolation(format!(
            "debug vector address {:#x} does not fit 24 bits",
            address
        )));
    }
    let mut be = [0u8; 4];
    be.pwrite_with(address, 0, BE)?;
    Ok([be[1], be[2], be[3]])
}

/// Parse the 4-byte debug-vector read answer: marker then 24-bit address.
pub fn parse_debug_vector(raw: &[u8]) -> Result<u32> {
    match raw {
        [tokens::DEBUG_VECTOR, hi, mid, lo] => {
            Ok((u32::from(*hi) << 16) | (u32::from(*mid) << 8) | u32::from(*lo))
        }
        _ => Err(Error::unexpected("read debug vector", "0xEF marker", raw)),
    }
}

/// Hardware model reported by the version query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgrammerModel {
    K128,
    K149A,
    K149B,
    K150,
}

impl ProgrammerModel {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ProgrammerModel::K128),
            1 => Some(ProgrammerModel::K149A),
            2 => Some(ProgrammerModel::K149B),
            3 => Some(ProgrammerModel::K150),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ProgrammerModel::K128 => "K128",
            ProgrammerModel::K149A => "K149-A",
            ProgrammerModel::K149B => "K149-B",
            ProgrammerModel::K150 => "K150",
        }
    }
}

impl fmt::Display for ProgrammerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Four-byte protocol identifier, e.g. `P18A`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(pub [u8; 4]);

impl ProtocolId {
    pub fn as_ascii(&self) -> String {
        self.0.iter().map(|&b| b as char).collect()
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_ascii(), self.to_hex())
    }
}

impl fmt::Debug for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolId({})", self)
    }
}

/// Bytes streamed back from a memory read.
///
/// The stream may end early; `is_short` tells whether fewer bytes than
/// requested arrived.
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryDump {
    data: Vec<u8>,
    expected: usize,
}

impl MemoryDump {
    pub fn new(data: Vec<u8>, expected: usize) -> Self {
        MemoryDump { data, expected }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_short(&self) -> bool {
        self.data.len() < self.expected
    }

    /// Uppercase hex rendering, two digits per byte.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.data)
    }
}

impl fmt::Debug for MemoryDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryDump[{}/{}]({})", self.data.len(), self.expected, self.to_hex())
    }
}

impl fmt::Display for MemoryDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CoreType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_program_vars_layout() {
        let mut chip = ChipProfile::for_test(CoreType::Bit16B);
        chip.flags.set_band_gap_fuse(true);
        chip.flags.set_vcc_vpp_delay(true);
        chip.power_sequence = 2;
        chip.erase_mode = 6;
        chip.program_tries = 3;
        chip.over_program = 4;

        let raw = ProgramVars::from_profile(&chip).unwrap().encode().unwrap();
        assert_eq!(raw, [0x04, 0x00, 0x01, 0x00, 2, 0b1010, 50, 2, 6, 3, 4]);
    }

    #[test]
    fn test_program_vars_decode_restores_fields() {
        let mut chip = ChipProfile::for_test(CoreType::Bit14H);
        chip.rom_size = 0x1234;
        chip.eeprom_size = 0x80;
        chip.flags = ProgramFlags::from_bits(0b0101);
        let vars = ProgramVars::from_profile(&chip).unwrap();
        let decoded = ProgramVars::decode(&vars.encode().unwrap()).unwrap();
        assert_eq!(decoded, vars);
        assert_eq!(decoded.rom_size, 0x1234);
        assert_eq!(decoded.core_type, 12);
        assert!(decoded.flags.calibration_in_rom());
        assert!(decoded.flags.single_panel_access());
    }

    #[test]
    fn test_program_vars_rejects_oversized_profile() {
        let mut chip = ChipProfile::for_test(CoreType::Bit16A);
        chip.rom_size = 0x1_0000;
        assert!(matches!(
            ProgramVars::from_profile(&chip),
            Err(Error::SizeViolation(_))
        ));
    }

    #[test]
    fn test_fuse_payload_16bit() {
        let image = FirmwareImage::new(
            vec![],
            vec![],
            vec![1, 2, 3, 4, 5, 6, 7, 8],
            vec![0x1122, 0x3344, 0x5566, 0x7788, 0x99aa, 0xbbcc, 0xddee],
        );
        let payload = fuse_id_payload(CoreWidth::Bit16, &image).unwrap();
        assert_eq!(&payload[..2], b"00");
        assert_eq!(&payload[2..10], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&payload[10..14], &[0x22, 0x11, 0x44, 0x33]);
        assert_eq!(&payload[22..], &[0xee, 0xdd]);
        assert_eq!(payload.len(), 24);
    }

    #[test]
    fn test_fuse_payload_14bit() {
        let image = FirmwareImage::new(vec![], vec![], vec![9, 8, 7, 6], vec![0x3f72, 0x3fff]);
        let payload = fuse_id_payload(CoreWidth::Bit14, &image).unwrap();
        let mut expected = b"00".to_vec();
        expected.extend_from_slice(&[9, 8, 7, 6]);
        expected.extend_from_slice(b"FFFF");
        expected.extend_from_slice(&[0x72, 0x3f]);
        expected.extend_from_slice(&[0xff; 12]);
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_response_classification() {
        assert_eq!(Response::classify(b'Y', tokens::ACK), Response::Ack);
        assert_eq!(Response::classify(b'N', tokens::ACK), Response::Nack);
        assert_eq!(Response::classify(b'v', tokens::VOLTAGES_ON), Response::Other(b'v'));
        assert!(matches!(
            Response::Nack.into_result("erase", "'Y'"),
            Err(Error::Nack { operation: "erase" })
        ));
    }

    #[test]
    fn test_debug_vector_codec() {
        assert_eq!(debug_vector_address(0x0012_3456).unwrap(), [0x12, 0x34, 0x56]);
        assert!(debug_vector_address(0x0100_0000).is_err());
        assert_eq!(parse_debug_vector(&[0xef, 0x00, 0x20, 0x08]).unwrap(), 0x2008);
        assert!(parse_debug_vector(&[0x00, 0x00, 0x20, 0x08]).is_err());
    }

    #[test]
    fn test_command_selectors() {
        assert_eq!(Command::ReadRom.selector(), 11);
        assert_eq!(Command::from_selector(16), Some(Command::EraseCheck));
        assert_eq!(Command::from_selector(10), None);
        assert_eq!(Command::ReadDebugVector.to_string(), "ReadDebugVector(23)");
    }

    #[test]
    fn test_version_codes() {
        assert_eq!(ProgrammerModel::from_code(2).map(|m| m.label()), Some("K149-B"));
        assert_eq!(ProgrammerModel::from_code(3), Some(ProgrammerModel::K150));
        assert_eq!(ProgrammerModel::from_code(4), None);
    }

    #[test]
    fn test_protocol_id_rendering() {
        let id = ProtocolId(*b"P18A");
        assert_eq!(id.to_string(), "P18A 50313841");
    }
}
