//! The older P014 command set. Only the probe and the reset handshake are
//! wired up; everything else is rejected.
use crate::device::ChipProfile;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::{MemoryDump, ProgrammerModel, ProtocolId};
use crate::transport::Transport;

use super::{Link, ProtocolEngine, ProtocolVariant, SessionState};

pub struct P014<T> {
    link: Link<T>,
}

impl<T: Transport> P014<T> {
    pub fn new(transport: T) -> Self {
        P014 {
            link: Link::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }
}

impl<T: Transport> ProtocolEngine for P014<T> {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::P014
    }

    fn state(&self) -> SessionState {
        self.link.state()
    }

    fn start_protocol(&mut self) -> Result<bool> {
        self.link.probe()
    }

    fn reset(&mut self) -> Result<()> {
        self.link.reset()
    }

    fn echo(&mut self, _value: u8) -> Result<u8> {
        Err(Error::Unsupported("echo"))
    }

    fn init_program_vars(&mut self, _chip: &ChipProfile) -> Result<()> {
        Err(Error::Unsupported("program variables"))
    }

    fn activate_voltages(&mut self) -> Result<()> {
        Err(Error::Unsupported("voltage control"))
    }

    fn deactivate_voltages(&mut self) -> Result<()> {
        Err(Error::Unsupported("voltage control"))
    }

    fn reinitialize_voltages(&mut self) -> Result<()> {
        Err(Error::Unsupported("voltage control"))
    }

    fn program_rom(&mut self, _chip: &ChipProfile, _image: &FirmwareImage) -> Result<()> {
        Err(Error::Unsupported("ROM programming"))
    }

    fn program_eeprom(&mut self, _chip: &ChipProfile, _image: &FirmwareImage) -> Result<()> {
        Err(Error::Unsupported("EEPROM programming"))
    }

    fn program_fuses_id(&mut self, _chip: &ChipProfile, _image: &FirmwareImage) -> Result<()> {
        Err(Error::Unsupported("fuse/ID programming"))
    }

    fn program_calibration(
        &mut self,
        _chip: &ChipProfile,
        _calibration: u16,
        _fuses: u16,
    ) -> Result<()> {
        Err(Error::Unsupported("calibration programming"))
    }

    fn read_rom(&mut self, _chip: &ChipProfile) -> Result<MemoryDump> {
        Err(Error::Unsupported("ROM read"))
    }

    fn read_eeprom(&mut self, _chip: &ChipProfile) -> Result<MemoryDump> {
        Err(Error::Unsupported("EEPROM read"))
    }

    fn read_config(&mut self) -> Result<MemoryDump> {
        Err(Error::Unsupported("config read"))
    }

    fn read_calibration(&mut self, _chip: &ChipProfile) -> Result<Option<MemoryDump>> {
        Err(Error::Unsupported("calibration read"))
    }

    fn erase(&mut self) -> Result<()> {
        Err(Error::Unsupported("erase"))
    }

    fn rom_is_blank(&mut self, _chip: &ChipProfile) -> Result<bool> {
        Err(Error::Unsupported("ROM erase check"))
    }

    fn eeprom_is_blank(&mut self) -> Result<bool> {
        Err(Error::Unsupported("EEPROM erase check"))
    }

    fn fuses_ready(&mut self) -> Result<bool> {
        Err(Error::Unsupported("fuse readiness"))
    }

    fn chip_in_socket(&mut self) -> Result<bool> {
        Err(Error::Unsupported("socket detection"))
    }

    fn chip_out_of_socket(&mut self) -> Result<bool> {
        Err(Error::Unsupported("socket detection"))
    }

    fn programmer_version(&mut self) -> Result<Option<ProgrammerModel>> {
        Err(Error::Unsupported("version query"))
    }

    fn protocol_id(&mut self) -> Result<ProtocolId> {
        Err(Error::Unsupported("protocol query"))
    }

    fn program_debug_vector(&mut self, _address: u32) -> Result<()> {
        Err(Error::Unsupported("debug vector"))
    }

    fn read_debug_vector(&mut self) -> Result<u32> {
        Err(Error::Unsupported("debug vector"))
    }

    fn program_10f_calibration(&mut self, _calibration: u16, _fuses: u16) -> Result<()> {
        Err(Error::Unsupported("10F calibration programming"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CoreType;
    use crate::transport::scripted::ScriptedTransport;

    #[test]
    fn stub_handshakes_but_rejects_operations() {
        let mut p = P014::new(ScriptedTransport::new().reply(b"P").gap().replies(b"QP"));
        assert!(p.start_protocol().unwrap());
        p.reset().unwrap();
        assert_eq!(p.state(), SessionState::Idle);
        let sent = p.transport().writes().len();

        let chip = ChipProfile::for_test(CoreType::Bit14B);
        let image = FirmwareImage::new(vec![0; 32], vec![], vec![], vec![]);
        assert!(matches!(p.init_program_vars(&chip), Err(Error::Unsupported(_))));
        assert!(matches!(p.program_rom(&chip, &image), Err(Error::Unsupported(_))));
        assert!(matches!(p.erase(), Err(Error::Unsupported(_))));
        assert!(matches!(p.programmer_version(), Err(Error::Unsupported(_))));
        assert_eq!(p.transport().writes().len(), sent);
    }
}
