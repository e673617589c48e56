//! Processed firmware regions, ready to be sent to the programmer.
//!
//! Parsing firmware files is left to the caller; this module only checks that
//! the region arrays have the shape the selected chip expects.

use crate::constants::{EEPROM_BLOCK_SIZE, ROM_BLOCK_SIZE};
use crate::device::{ChipProfile, CoreWidth};
use crate::error::{Error, Result};

/// Raw byte arrays for every programmable region of a chip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    /// One 16-bit word per two bytes
    pub rom: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub id: Vec<u8>,
    pub fuses: Vec<u16>,
}

impl FirmwareImage {
    pub fn new(rom: Vec<u8>, eeprom: Vec<u8>, id: Vec<u8>, fuses: Vec<u16>) -> Self {
        FirmwareImage {
            rom,
            eeprom,
            id,
            fuses,
        }
    }

    /// Image with no memory contents, a zeroed ID and the chip's blank fuses.
    ///
    /// 12-bit cores get no ID or fuses, since they have no fuse/ID layout.
    pub fn blank_for(chip: &ChipProfile) -> Self {
        if chip.core_width() == CoreWidth::Bit12 {
            return FirmwareImage::default();
        }
        FirmwareImage {
            id: vec![0; chip.id_size()],
            fuses: chip.fuse_blank.clone(),
            ..Default::default()
        }
    }

    pub fn rom_words(&self) -> usize {
        self.rom.len() / 2
    }

    /// Pad a word-aligned ROM image with erased words up to the transfer block size.
    pub fn pad_rom(&mut self) {
        if self.rom.len() % 2 != 0 {
            return;
        }
        let rem = self.rom.len() % ROM_BLOCK_SIZE;
        if rem != 0 {
            let padded = self.rom.len() + ROM_BLOCK_SIZE - rem;
            log::debug!("padding ROM image from {} to {} bytes", self.rom.len(), padded);
            self.rom.resize(padded, 0xff);
        }
    }

    pub fn check_rom(&self, chip: &ChipProfile) -> Result<()> {
        if self.rom.is_empty() {
            return Err(Error::SizeViolation("ROM image is empty".into()));
        }
        if self.rom.len() % ROM_BLOCK_SIZE != 0 {
            return Err(Error::SizeViolation(format!(
                "ROM image of {} bytes is not a multiple of {}",
                self.rom.len(),
                ROM_BLOCK_SIZE
            )));
        }
        if self.rom_words() > chip.rom_size as usize {
            return Err(Error::SizeViolation(format!(
                "ROM image of {} words exceeds {} capacity of {} words",
                self.rom_words(),
                chip,
                chip.rom_size
            )));
        }
        if self.rom_words() > u16::MAX as usize {
            return Err(Error::SizeViolation(format!(
                "ROM word count {} does not fit the 16-bit length field",
                self.rom_words()
            )));
        }
        Ok(())
    }

    pub fn check_eeprom(&self, chip: &ChipProfile) -> Result<()> {
        if self.eeprom.len() % EEPROM_BLOCK_SIZE != 0 {
            return Err(Error::SizeViolation(format!(
                "EEPROM image of {} bytes is not a multiple of {}",
                self.eeprom.len(),
                EEPROM_BLOCK_SIZE
            )));
        }
        if self.eeprom.len() > chip.eeprom_size as usize {
            return Err(Error::SizeViolation(format!(
                "EEPROM image of {} bytes exceeds {} capacity of {} bytes",
                self.eeprom.len(),
                chip,
                chip.eeprom_size
            )));
        }
        if self.eeprom.len() > u16::MAX as usize {
            return Err(Error::SizeViolation(format!(
                "EEPROM byte count {} does not fit the 16-bit length field",
                self.eeprom.len()
            )));
        }
        Ok(())
    }

    /// Check the ID and fuse arrays against the chip's core width.
    pub fn check_fuses_id(&self, chip: &ChipProfile) -> Result<CoreWidth> {
        let width = chip.core_width();
        let (id_len, fuses_ok) = match width {
            CoreWidth::Bit16 => (8, self.fuses.len() == 7),
            CoreWidth::Bit14 => (4, (1..=2).contains(&self.fuses.len())),
            CoreWidth::Bit12 => {
                return Err(Error::SizeViolation(format!(
                    "{} has a 12-bit core with no fuse/ID programming layout",
                    chip
                )));
            }
        };
        if self.id.len() != id_len {
            return Err(Error::SizeViolation(format!(
                "{}-bit core needs {} ID bytes, image has {}",
                width.bits(),
                id_len,
                self.id.len()
            )));
        }
        if !fuses_ok {
            return Err(Error::SizeViolation(format!(
                "{}-bit core cannot take {} fuse words",
                width.bits(),
                self.fuses.len()
            )));
        }
        Ok(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CoreType;
    use pretty_assertions::assert_eq;

    fn chip(core_type: CoreType) -> ChipProfile {
        ChipProfile::for_test(core_type)
    }

    #[test]
    fn rom_must_be_block_aligned() {
        let chip = chip(CoreType::Bit16B);
        for len in [2, 30, 34, 2047] {
            let image = FirmwareImage::new(vec![0; len], vec![], vec![], vec![]);
            assert!(matches!(image.check_rom(&chip), Err(Error::SizeViolation(_))), "{len}");
        }
        for len in [32, 64, 2048] {
            let image = FirmwareImage::new(vec![0; len], vec![], vec![], vec![]);
            assert!(image.check_rom(&chip).is_ok(), "{len}");
        }
    }

    #[test]
    fn rom_must_fit_the_chip() {
        let chip = chip(CoreType::Bit16B);
        let image = FirmwareImage::new(vec![0; 2080], vec![], vec![], vec![]);
        assert!(matches!(image.check_rom(&chip), Err(Error::SizeViolation(_))));
    }

    #[test]
    fn eeprom_must_be_even_and_fit() {
        let chip = chip(CoreType::Bit14B);
        let odd = FirmwareImage::new(vec![], vec![0; 3], vec![], vec![]);
        assert!(odd.check_eeprom(&chip).is_err());
        let big = FirmwareImage::new(vec![], vec![0; 258], vec![], vec![]);
        assert!(big.check_eeprom(&chip).is_err());
        let ok = FirmwareImage::new(vec![], vec![0; 256], vec![], vec![]);
        assert!(ok.check_eeprom(&chip).is_ok());
    }

    #[test]
    fn fuse_id_shape_follows_core_width() {
        let pic18 = chip(CoreType::Bit16C);
        let good = FirmwareImage::new(vec![], vec![], vec![0; 8], vec![0xffff; 7]);
        assert_eq!(good.check_fuses_id(&pic18).unwrap(), CoreWidth::Bit16);
        let short = FirmwareImage::new(vec![], vec![], vec![0; 8], vec![0xffff; 6]);
        assert!(short.check_fuses_id(&pic18).is_err());

        let pic16 = chip(CoreType::Bit14G);
        for fuses in [1, 2] {
            let image = FirmwareImage::new(vec![], vec![], vec![0; 4], vec![0x3fff; fuses]);
            assert_eq!(image.check_fuses_id(&pic16).unwrap(), CoreWidth::Bit14);
        }
        let three = FirmwareImage::new(vec![], vec![], vec![0; 4], vec![0x3fff; 3]);
        assert!(three.check_fuses_id(&pic16).is_err());
        let long_id = FirmwareImage::new(vec![], vec![], vec![0; 8], vec![0x3fff]);
        assert!(long_id.check_fuses_id(&pic16).is_err());

        let pic12 = chip(CoreType::Bit12A);
        let image = FirmwareImage::new(vec![], vec![], vec![0; 4], vec![0xfff]);
        assert!(image.check_fuses_id(&pic12).is_err());
    }

    #[test]
    fn pad_rom_fills_with_erased_words() {
        let mut image = FirmwareImage::new(vec![0x12, 0x34], vec![], vec![], vec![]);
        image.pad_rom();
        assert_eq!(image.rom.len(), 32);
        assert_eq!(&image.rom[..4], &[0x12, 0x34, 0xff, 0xff]);

        let mut odd = FirmwareImage::new(vec![0; 3], vec![], vec![], vec![]);
        odd.pad_rom();
        assert_eq!(odd.rom.len(), 3);
    }

    #[test]
    fn blank_image_matches_chip_shape() {
        let chip = chip(CoreType::Bit14B);
        let image = FirmwareImage::blank_for(&chip);
        assert_eq!(image.id, vec![0; 4]);
        assert_eq!(image.check_fuses_id(&chip).unwrap(), CoreWidth::Bit14);

        let image = FirmwareImage::blank_for(&ChipProfile::for_test(CoreType::Bit12A));
        assert!(image.id.is_empty());
        assert!(image.fuses.is_empty());
    }
}
