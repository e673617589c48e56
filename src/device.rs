//! PIC chip definitions, with chip-specific programming parameters
use std::path::Path;

use anyhow::Result;
use bitfield::bitfield;
use serde::{Deserialize, Serialize};

/// Instruction-word width family of a PIC core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreWidth {
    Bit12,
    Bit14,
    Bit16,
}

impl CoreWidth {
    pub const fn bits(self) -> u8 {
        match self {
            CoreWidth::Bit12 => 12,
            CoreWidth::Bit14 => 14,
            CoreWidth::Bit16 => 16,
        }
    }
}

/// Core type names as used by the programmer firmware chip tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreType {
    Bit16A,
    Bit16B,
    Bit14G,
    Bit12A,
    Bit14A,
    Bit14B,
    Bit14C,
    Bit14D,
    Bit14E,
    Bit14F,
    Bit12B,
    Bit14H,
    Bit16C,
}

impl CoreType {
    /// Code sent to the firmware in the program-variables block.
    pub const fn code(self) -> u8 {
        match self {
            CoreType::Bit16A => 1,
            CoreType::Bit16B => 2,
            CoreType::Bit14G => 3,
            CoreType::Bit12A => 4,
            CoreType::Bit14A => 5,
            CoreType::Bit14B => 6,
            CoreType::Bit14C => 7,
            CoreType::Bit14D => 8,
            CoreType::Bit14E => 9,
            CoreType::Bit14F => 10,
            CoreType::Bit12B => 11,
            CoreType::Bit14H => 12,
            CoreType::Bit16C => 13,
        }
    }

    /// The underlying core family number, which groups several table codes.
    pub const fn family(self) -> u8 {
        match self {
            CoreType::Bit16A | CoreType::Bit16C => 0,
            CoreType::Bit16B => 2,
            CoreType::Bit14G => 3,
            CoreType::Bit12B | CoreType::Bit14A => 5,
            CoreType::Bit14D => 6,
            CoreType::Bit14E => 7,
            CoreType::Bit14C => 8,
            CoreType::Bit14F => 9,
            CoreType::Bit14H => 10,
            CoreType::Bit14B => 11,
            CoreType::Bit12A => 12,
        }
    }

    pub const fn width(self) -> CoreWidth {
        match self {
            CoreType::Bit16A | CoreType::Bit16B | CoreType::Bit16C => CoreWidth::Bit16,
            CoreType::Bit12A | CoreType::Bit12B => CoreWidth::Bit12,
            _ => CoreWidth::Bit14,
        }
    }

    /// PIC18 parts that must be written in single-panel mode.
    pub const fn single_panel_access(self) -> bool {
        matches!(self, CoreType::Bit16A)
    }
}

/// Order in which VCC and VPP are raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSequence {
    Vcc,
    VccVpp1,
    VccVpp2,
    Vpp1Vcc,
    Vpp2Vcc,
    VccFastVpp1,
    VccFastVpp2,
}

impl PowerSequence {
    pub const fn code(self) -> u8 {
        match self {
            PowerSequence::Vcc => 0,
            PowerSequence::VccVpp1 | PowerSequence::VccFastVpp1 => 1,
            PowerSequence::VccVpp2 | PowerSequence::VccFastVpp2 => 2,
            PowerSequence::Vpp1Vcc => 3,
            PowerSequence::Vpp2Vcc => 4,
        }
    }

    /// In-circuit programming has no second VPP rail.
    pub const fn icsp_code(self) -> u8 {
        match self.code() {
            2 => 1,
            4 => 3,
            code => code,
        }
    }

    pub const fn vcc_vpp_delay(self) -> bool {
        matches!(self, PowerSequence::VccFastVpp1 | PowerSequence::VccFastVpp2)
    }
}

bitfield! {
    /// Flags byte of the program-variables block.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ProgramFlags(u8);
    impl Debug;
    pub calibration_in_rom, set_calibration_in_rom: 0;
    pub band_gap_fuse, set_band_gap_fuse: 1;
    pub single_panel_access, set_single_panel_access: 2;
    pub vcc_vpp_delay, set_vcc_vpp_delay: 3;
}

impl ProgramFlags {
    pub const fn from_bits(bits: u8) -> Self {
        ProgramFlags(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }
}

/// Per-chip constants consumed by the protocol engine.
///
/// Fixed for the lifetime of a session; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipProfile {
    pub name: String,
    /// ROM size in words
    pub rom_size: u32,
    /// EEPROM size in bytes
    pub eeprom_size: u32,
    pub core_type: CoreType,
    pub flags: ProgramFlags,
    pub program_delay: u8,
    pub power_sequence: u8,
    pub erase_mode: u8,
    pub program_tries: u8,
    pub over_program: u8,
    /// Fuse words of an erased chip
    pub fuse_blank: Vec<u16>,
    pub chip_id: Option<u16>,
}

impl ::std::fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "PIC{}({:?})", self.name, self.core_type)
    }
}

impl ChipProfile {
    pub const fn core_width(&self) -> CoreWidth {
        self.core_type.width()
    }

    /// Length of the ID block for this core.
    pub const fn id_size(&self) -> usize {
        match self.core_width() {
            CoreWidth::Bit16 => 8,
            _ => 4,
        }
    }

    pub const fn rom_bytes(&self) -> usize {
        self.rom_size as usize * 2
    }

    pub const fn has_eeprom(&self) -> bool {
        self.eeprom_size != 0
    }

    /// 1K-word ROM, 256-byte EEPROM, no flags, single try.
    #[cfg(test)]
    pub(crate) fn for_test(core_type: CoreType) -> Self {
        ChipProfile {
            name: "TEST".into(),
            rom_size: 1024,
            eeprom_size: 256,
            core_type,
            flags: ProgramFlags::default(),
            program_delay: 50,
            power_sequence: 1,
            erase_mode: 1,
            program_tries: 1,
            over_program: 1,
            fuse_blank: vec![0x3fff],
            chip_id: None,
        }
    }
}

/// Chip family, one per database file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub variants: Vec<Chip>,
}

/// A chip database record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    /// Chip's name, without the "PIC" prefix
    pub name: String,
    pub core_type: CoreType,
    #[serde(deserialize_with = "parse_number")]
    pub rom_size: u32,
    #[serde(default, deserialize_with = "parse_number")]
    pub eeprom_size: u32,
    pub power_sequence: PowerSequence,
    pub program_delay: u8,
    #[serde(default = "one")]
    pub program_tries: u8,
    #[serde(default)]
    pub over_program: u8,
    pub erase_mode: u8,
    #[serde(default)]
    pub cal_word: bool,
    #[serde(default)]
    pub band_gap: bool,
    #[serde(default)]
    pub icsp_only: bool,
    #[serde(default, deserialize_with = "parse_optional_number")]
    pub chip_id: Option<u32>,
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(deserialize_with = "parse_numbers")]
    pub fuse_blank: Vec<u32>,
}

fn one() -> u8 {
    1
}

impl Chip {
    /// Resolve the record into the parameters sent to the programmer.
    pub fn profile(&self, icsp: bool) -> ChipProfile {
        let mut flags = ProgramFlags::default();
        flags.set_calibration_in_rom(self.cal_word);
        flags.set_band_gap_fuse(self.band_gap);
        flags.set_single_panel_access(self.core_type.single_panel_access());
        flags.set_vcc_vpp_delay(self.power_sequence.vcc_vpp_delay());

        ChipProfile {
            name: self.name.clone(),
            rom_size: self.rom_size,
            eeprom_size: self.eeprom_size,
            core_type: self.core_type,
            flags,
            program_delay: self.program_delay,
            power_sequence: if icsp || self.icsp_only {
                self.power_sequence.icsp_code()
            } else {
                self.power_sequence.code()
            },
            erase_mode: self.erase_mode,
            program_tries: self.program_tries,
            over_program: self.over_program,
            fuse_blank: self.fuse_blank.iter().map(|&w| w as u16).collect(),
            chip_id: self.chip_id.map(|id| id as u16),
        }
    }

    /// Pin 1 position in the ZIF socket, when known.
    pub fn pin1_location(&self) -> Option<&'static str> {
        match self.socket.as_deref()? {
            "8pin" | "14pin" => Some("socket pin 13"),
            "18pin" => Some("socket pin 2"),
            "28Npin" | "40pin" => Some("socket pin 1"),
            _ => None,
        }
    }
}

pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            families: vec![
                serde_yaml::from_str(include_str!("../devices/bit12.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/bit14.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/bit16.yaml"))?,
            ],
        })
    }

    /// Load a user supplied database: a YAML list of families.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)?;
        let families: Vec<Family> = serde_yaml::from_str(&raw)?;
        log::info!("Loaded {} chip families from {}", families.len(), p.display());
        Ok(ChipDB { families })
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn chips(&self) -> impl Iterator<Item = &Chip> {
        self.families.iter().flat_map(|f| f.variants.iter())
    }

    /// Look up a chip by name, ignoring case and an optional "PIC" prefix.
    pub fn find_chip(&self, name: &str) -> Result<Chip> {
        let wanted = name.trim();
        let wanted = wanted
            .strip_prefix("PIC")
            .or_else(|| wanted.strip_prefix("pic"))
            .unwrap_or(wanted);

        let chip = self
            .chips()
            .find(|c| c.name.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| anyhow::format_err!("Cannot find chip {:?} in chip database", name))?;
        log::debug!("Find chip: {} ({:?})", chip.name, chip.core_type);
        Ok(chip)
    }
}

fn parse_value<E: serde::de::Error>(s: &str) -> std::result::Result<u32, E> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(kib) = s.strip_suffix('K') {
        kib.parse::<u32>().map(|k| k * 1024)
    } else {
        s.parse()
    };
    parsed.map_err(|e| E::custom(format!("error while parsing {:?}: {}", s, e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u32),
    Str(String),
}

impl RawNumber {
    fn resolve<E: serde::de::Error>(self) -> std::result::Result<u32, E> {
        match self {
            RawNumber::Int(n) => Ok(n),
            RawNumber::Str(s) => parse_value(&s),
        }
    }
}

fn parse_number<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    RawNumber::deserialize(deserializer)?.resolve()
}

fn parse_optional_number<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<RawNumber>::deserialize(deserializer)?
        .map(RawNumber::resolve)
        .transpose()
}

fn parse_numbers<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Vec::<RawNumber>::deserialize(deserializer)?
        .into_iter()
        .map(RawNumber::resolve)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_core_type_tables() {
        assert_eq!(CoreType::Bit16A.code(), 1);
        assert_eq!(CoreType::Bit16C.code(), 13);
        assert_eq!(CoreType::Bit14H.width(), CoreWidth::Bit14);
        assert_eq!(CoreType::Bit12B.width(), CoreWidth::Bit12);
        assert_eq!(CoreType::Bit16C.width(), CoreWidth::Bit16);
        assert_eq!(CoreType::Bit12A.family(), 12);
        assert_eq!(CoreType::Bit14B.family(), 11);
    }

    #[test]
    fn test_power_sequence_codes() {
        assert_eq!(PowerSequence::VccFastVpp2.code(), 2);
        assert!(PowerSequence::VccFastVpp1.vcc_vpp_delay());
        assert!(!PowerSequence::VccVpp1.vcc_vpp_delay());
        assert_eq!(PowerSequence::VccVpp2.icsp_code(), 1);
        assert_eq!(PowerSequence::Vpp2Vcc.icsp_code(), 3);
        assert_eq!(PowerSequence::Vpp1Vcc.icsp_code(), 3);
    }

    #[test]
    fn test_program_flags_bits() {
        let mut flags = ProgramFlags::default();
        flags.set_calibration_in_rom(true);
        flags.set_vcc_vpp_delay(true);
        assert_eq!(flags.bits(), 0b1001);
        assert!(!flags.band_gap_fuse());
    }

    #[test]
    fn test_embedded_database_loads() {
        let db = ChipDB::load().unwrap();
        assert!(db.chips().count() > 5);

        let chip = db.find_chip("PIC16F628A").unwrap();
        assert_eq!(chip.core_type, CoreType::Bit14G);
        let profile = chip.profile(false);
        assert_eq!(profile.rom_size, 0x800);
        assert_eq!(profile.eeprom_size, 0x80);
        assert_eq!(profile.id_size(), 4);

        let chip = db.find_chip("18f452").unwrap();
        let profile = chip.profile(false);
        assert!(profile.flags.single_panel_access());
        assert_eq!(profile.fuse_blank.len(), 7);
        assert_eq!(profile.id_size(), 8);

        assert!(db.find_chip("16F999").is_err());
    }

    #[test]
    fn test_chip_record_parsing() {
        let yaml = r#"
name: Test
variants:
  - name: 12F675
    core_type: bit14_c
    rom_size: "0x400"
    eeprom_size: 128
    power_sequence: vccfastvpp2
    program_delay: 60
    erase_mode: 2
    cal_word: true
    band_gap: true
    chip_id: "0x0FC0"
    socket: 8pin
    fuse_blank: ["0x31FF"]
"#;
        let family: Family = serde_yaml::from_str(yaml).unwrap();
        let chip = &family.variants[0];
        assert_eq!(chip.pin1_location(), Some("socket pin 13"));

        let profile = chip.profile(false);
        assert_eq!(profile.rom_size, 0x400);
        assert_eq!(profile.eeprom_size, 128);
        assert_eq!(profile.program_tries, 1);
        assert_eq!(profile.power_sequence, 2);
        assert_eq!(profile.flags.bits(), 0b1011);
        assert_eq!(profile.chip_id, Some(0x0fc0));
        assert_eq!(profile.fuse_blank, vec![0x31ff]);

        assert_eq!(chip.profile(true).power_sequence, 1);
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let yaml = r#"
name: Broken
variants:
  - name: X
    core_type: bit14_b
    rom_size: "0xZZ"
    power_sequence: vcc
    program_delay: 1
    erase_mode: 1
    fuse_blank: []
"#;
        assert!(serde_yaml::from_str::<Family>(yaml).is_err());
    }
}
