//! The P018 command set, spoken by K150 firmware.
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::constants::{
    CONFIG_DATA_SIZE, EEPROM_BLOCK_SIZE, ROM_BLANK_HIGH_BYTE, ROM_BLOCK_SIZE, commands, timing,
    tokens,
};
use crate::device::ChipProfile;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::{self, MemoryDump, ProgramVars, ProgrammerModel, ProtocolId, Response};
use crate::transport::Transport;

use super::{Link, ProtocolEngine, ProtocolVariant, SessionState};

pub struct P018<T> {
    link: Link<T>,
}

impl<T: Transport> P018<T> {
    pub fn new(transport: T) -> Self {
        P018 {
            link: Link::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    /// Send a memory region in fixed-size chunks, each one acknowledged.
    fn transfer_blocks(
        &mut self,
        selector: u8,
        count: u16,
        data: &[u8],
        block_size: usize,
        operation: &'static str,
    ) -> Result<()> {
        self.link.begin_transfer(selector, &count.to_be_bytes())?;
        self.link.expect(tokens::ACK, timing::DEFAULT, operation, "'Y' after length")?;

        let block_timeout = if block_size == ROM_BLOCK_SIZE {
            timing::EXTENDED
        } else {
            timing::DEFAULT
        };
        let pb = ProgressBar::new(data.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>7}/{total_bytes:7} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(operation);

        for (i, block) in data.chunks(block_size).enumerate() {
            self.link.write(block)?;
            self.link
                .expect(tokens::ACK, block_timeout, operation, "'Y' after block")
                .inspect_err(|_| {
                    log::debug!("{}: block {} refused", operation, i);
                    pb.abandon();
                })?;
            pb.inc(block.len() as u64);
        }
        pb.finish_and_clear();
        Ok(())
    }

    /// Run a read command under voltages and stream `expected` bytes back.
    fn read_region(&mut self, selector: u8, expected: usize) -> Result<MemoryDump> {
        self.link.reset()?;
        self.activate_voltages()?;
        self.link.begin_transfer(selector, &[])?;
        let dump = self.link.read_stream(expected)?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        Ok(dump)
    }

    /// Bare selector answered by a single byte, then reset.
    fn query_byte(&mut self, selector: u8, params: &[u8], timeout: Duration) -> Result<u8> {
        self.link.reset()?;
        self.link.send_selector(selector, params)?;
        let byte = self.link.read_byte(timeout)?;
        self.link.reset()?;
        Ok(byte)
    }

    /// Socket detection: an informational first byte (normally `'A'`), then
    /// the verdict byte.
    fn detect(&mut self, selector: u8, operation: &'static str) -> Result<bool> {
        self.link.reset()?;
        self.link.send_selector(selector, &[])?;
        let started = self.link.read_byte(timing::EXTENDED)?;
        if started == tokens::DETECT_STARTED {
            log::debug!("{}: detection started", operation);
        } else {
            log::debug!("{}: unusual start byte {:#04x}", operation, started);
        }
        let verdict = self.link.read_byte(timing::EXTENDED)?;
        self.link.reset()?;
        Ok(verdict == tokens::ACK)
    }
}

impl<T: Transport> ProtocolEngine for P018<T> {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::P018
    }

    fn state(&self) -> SessionState {
        self.link.state()
    }

    fn start_protocol(&mut self) -> Result<bool> {
        let alive = self.link.probe()?;
        if alive {
            log::info!("Programmer answers the P018 command set");
        } else {
            log::warn!("Programmer did not answer the probe");
        }
        Ok(alive)
    }

    fn reset(&mut self) -> Result<()> {
        self.link.reset()
    }

    fn echo(&mut self, value: u8) -> Result<u8> {
        self.link.handshake(commands::ECHO)?;
        self.link.write(&[value])?;
        let echoed = self.link.read_byte(timing::EXTENDED)?;
        self.link.reset()?;
        Ok(echoed)
    }

    fn init_program_vars(&mut self, chip: &ChipProfile) -> Result<()> {
        let payload = ProgramVars::from_profile(chip)?.encode()?;
        self.link.handshake(commands::INIT_PROGRAM_VARS)?;
        self.link.write(&payload)?;
        let answer = self.link.read_byte(timing::DEFAULT)?;
        self.link.reset()?;
        Response::classify(answer, tokens::VARS_ACCEPTED).into_result("init program vars", "'I'")?;
        log::info!("Program variables for {} accepted", chip);
        Ok(())
    }

    fn activate_voltages(&mut self) -> Result<()> {
        self.link.voltages_on(commands::VOLTAGES_ON, "activate voltages")
    }

    fn deactivate_voltages(&mut self) -> Result<()> {
        self.link.voltages_off()
    }

    fn reinitialize_voltages(&mut self) -> Result<()> {
        self.link.voltages_on(commands::CYCLE_VOLTAGES, "reinitialize voltages")
    }

    fn program_rom(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()> {
        image.check_rom(chip)?;
        let words = image.rom_words() as u16;

        self.link.reset()?;
        self.activate_voltages()?;
        self.transfer_blocks(
            commands::PROGRAM_ROM,
            words,
            &image.rom,
            ROM_BLOCK_SIZE,
            "program ROM",
        )?;
        self.link
            .expect(tokens::PROGRAM_DONE, timing::EXTENDED, "program ROM", "'P'")?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        log::info!("Programmed {} ROM words", words);
        Ok(())
    }

    fn program_eeprom(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()> {
        image.check_eeprom(chip)?;
        if image.eeprom.is_empty() {
            log::debug!("no EEPROM data, skipping");
            return Ok(());
        }
        let count = image.eeprom.len() as u16;

        self.link.reset()?;
        self.activate_voltages()?;
        self.transfer_blocks(
            commands::PROGRAM_EEPROM,
            count,
            &image.eeprom,
            EEPROM_BLOCK_SIZE,
            "program EEPROM",
        )?;
        self.link.write(&[0x00, 0x00])?;
        self.link
            .expect(tokens::PROGRAM_DONE, timing::EXTENDED, "program EEPROM", "'P'")?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        log::info!("Programmed {} EEPROM bytes", count);
        Ok(())
    }

    fn program_fuses_id(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()> {
        let width = image.check_fuses_id(chip)?;
        let payload = protocol::fuse_id_payload(width, image)?;

        self.link.reset()?;
        self.activate_voltages()?;
        self.link.begin_transfer(commands::PROGRAM_FUSES_ID, &payload)?;
        let answer = self.link.read_byte(timing::DEFAULT)?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        Response::classify(answer, tokens::ACK).into_result("program fuses/ID", "'Y'")?;
        log::info!("Programmed ID and {} fuse words", image.fuses.len());
        Ok(())
    }

    fn program_calibration(
        &mut self,
        _chip: &ChipProfile,
        _calibration: u16,
        _fuses: u16,
    ) -> Result<()> {
        Err(Error::Unsupported("calibration programming"))
    }

    fn read_rom(&mut self, chip: &ChipProfile) -> Result<MemoryDump> {
        self.read_region(commands::READ_ROM, chip.rom_bytes())
    }

    fn read_eeprom(&mut self, chip: &ChipProfile) -> Result<MemoryDump> {
        self.read_region(commands::READ_EEPROM, chip.eeprom_size as usize)
    }

    fn read_config(&mut self) -> Result<MemoryDump> {
        self.link.reset()?;
        self.activate_voltages()?;
        self.link.begin_transfer(commands::READ_CONFIG, &[])?;
        self.link
            .expect(tokens::CONFIG_READY, timing::DEFAULT, "read config", "'C'")?;
        let dump = self.link.read_stream(CONFIG_DATA_SIZE)?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        Ok(dump)
    }

    fn read_calibration(&mut self, _chip: &ChipProfile) -> Result<Option<MemoryDump>> {
        Ok(None)
    }

    fn erase(&mut self) -> Result<()> {
        self.link.reset()?;
        self.activate_voltages()?;
        self.link.begin_transfer(commands::ERASE, &[])?;
        let answer = self.link.read_byte(timing::EXTENDED)?;
        self.link.end_transfer();
        self.deactivate_voltages()?;
        self.link.reset()?;
        Response::classify(answer, tokens::ACK).into_result("erase", "'Y'")?;
        log::info!("Chip erased");
        Ok(())
    }

    fn rom_is_blank(&mut self, chip: &ChipProfile) -> Result<bool> {
        self.link.reset()?;
        self.link
            .send_selector(commands::ERASE_CHECK, &[ROM_BLANK_HIGH_BYTE])?;
        loop {
            let byte = self.link.read_byte(timing::EXTENDED)?;
            let blank = match byte {
                tokens::STILL_SCANNING => continue,
                tokens::ACK => true,
                tokens::NACK | tokens::NOT_BLANK => false,
                _ => {
                    self.link.reset()?;
                    return Err(Error::unexpected("ROM erase check", "'Y', 'N' or 'C'", &[byte]));
                }
            };
            self.link.reset()?;
            log::debug!("{} ROM blank: {}", chip, blank);
            return Ok(blank);
        }
    }

    fn eeprom_is_blank(&mut self) -> Result<bool> {
        match self.query_byte(commands::ERASE_CHECK, &[], timing::EXTENDED)? {
            tokens::ACK => Ok(true),
            tokens::NACK => Ok(false),
            b => Err(Error::unexpected("EEPROM erase check", "'Y' or 'N'", &[b])),
        }
    }

    fn fuses_ready(&mut self) -> Result<bool> {
        match self.query_byte(commands::FUSES_READY, &[], timing::DEFAULT)? {
            tokens::ACK => Ok(true),
            tokens::FUSES_BUSY | tokens::NACK => Ok(false),
            b => Err(Error::unexpected("fuse readiness", "'Y', 'B' or 'N'", &[b])),
        }
    }

    fn chip_in_socket(&mut self) -> Result<bool> {
        self.detect(commands::DETECT_IN_SOCKET, "detect chip in socket")
    }

    fn chip_out_of_socket(&mut self) -> Result<bool> {
        self.detect(commands::DETECT_OUT_OF_SOCKET, "detect empty socket")
    }

    fn programmer_version(&mut self) -> Result<Option<ProgrammerModel>> {
        let code = self.query_byte(commands::VERSION, &[], timing::DEFAULT)?;
        let model = ProgrammerModel::from_code(code);
        if model.is_none() {
            log::warn!("Unknown programmer model code {}", code);
        }
        Ok(model)
    }

    fn protocol_id(&mut self) -> Result<ProtocolId> {
        self.link.reset()?;
        self.link.send_selector(commands::PROTOCOL_ID, &[])?;
        let raw = self.link.read_exact(4, timing::DEFAULT)?;
        self.link.reset()?;
        Ok(ProtocolId([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn program_debug_vector(&mut self, address: u32) -> Result<()> {
        let addr = protocol::debug_vector_address(address)?;
        let answer = self.query_byte(commands::PROGRAM_DEBUG_VECTOR, &addr, timing::EXTENDED)?;
        Response::classify(answer, tokens::ACK).into_result("program debug vector", "'Y'")
    }

    fn read_debug_vector(&mut self) -> Result<u32> {
        self.link.reset()?;
        self.link.send_selector(commands::READ_DEBUG_VECTOR, &[])?;
        let raw = self.link.read_exact(4, timing::DEFAULT)?;
        self.link.reset()?;
        protocol::parse_debug_vector(&raw)
    }

    fn program_10f_calibration(&mut self, _calibration: u16, _fuses: u16) -> Result<()> {
        Err(Error::Unsupported("10F calibration programming"))
    }
}
