//! Protocol engines: the command dispatcher contract and its session plumbing.
//!
//! A session always starts with a reset. Voltage, init-vars and echo commands
//! are entered through the full wake handshake; every other selector is
//! written bare while the firmware waits at its jump table.
use std::fmt;
use std::time::Duration;

use crate::constants::{MAX_PACKET_SIZE, commands, timing, tokens};
use crate::device::ChipProfile;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::{Command, MemoryDump, ProgrammerModel, ProtocolId, Response};
use crate::transport::Transport;

pub use self::p014::P014;
pub use self::p018::P018;

mod p014;
mod p018;

/// Where the programmer firmware stands in its command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No reset has succeeded yet, or the transport failed.
    Closed,
    /// At the jump table, ready for a selector.
    Idle,
    /// Wake handshake done, selector not yet sent.
    JumpTableEntered,
    /// A command is running; only a reset leaves this state.
    CommandSelected(u8),
    VoltagesActive,
    /// A memory command is moving data under programming voltages.
    Transfer(u8),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::CommandSelected(sel) => write!(f, "command {} selected", sel),
            SessionState::Transfer(sel) => write!(f, "transfer {} in progress", sel),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Owns the transport and tracks the session state around every exchange.
pub(crate) struct Link<T> {
    transport: T,
    state: SessionState,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Link {
            transport,
            state: SessionState::Closed,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn select(&mut self, selector: u8) -> Result<()> {
        match Command::from_selector(selector) {
            Some(cmd) => log::trace!("select {}", cmd),
            None => log::trace!("select unknown command {}", selector),
        }
        self.write(&[selector])
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::trace!("session: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn check<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.set_state(SessionState::Closed);
            }
        }
        result
    }

    pub fn write(&mut self, raw: &[u8]) -> Result<()> {
        log::debug!("=> {}", hex::encode(raw));
        let ret = self.transport.write(raw, timing::WRITE);
        self.check(ret)
    }

    pub fn read_exact(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>> {
        let ret = self.transport.read_exact(count, timeout);
        let raw = self.check(ret)?;
        log::debug!("<= {}", hex::encode(&raw));
        Ok(raw)
    }

    pub fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        Ok(self.read_exact(1, timeout)?[0])
    }

    pub fn drain(&mut self) -> Result<usize> {
        let ret = self.transport.drain();
        let n = self.check(ret)?;
        if n > 0 {
            log::warn!("dropped {} stale bytes from programmer", n);
        }
        Ok(n)
    }

    /// Read one byte and require it to be `ack`.
    pub fn expect(
        &mut self,
        ack: u8,
        timeout: Duration,
        operation: &'static str,
        expected: &'static str,
    ) -> Result<()> {
        let byte = self.read_byte(timeout)?;
        let resp = Response::classify(byte, ack);
        if !resp.is_ok() {
            log::debug!("{}: got {:?}", operation, resp);
            self.drain()?;
        }
        resp.into_result(operation, expected)
    }

    /// Liveness probe: `'P'` out, `'P'` back. Touches no session state.
    pub fn probe(&mut self) -> Result<bool> {
        self.write(&[tokens::JUMP])?;
        let byte = match self.read_byte(timing::DEFAULT) {
            Ok(b) => b,
            Err(Error::TransportTimeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.drain()?;
        Ok(byte == tokens::JUMP)
    }

    /// Wake the firmware, enter the jump table and send `selector`.
    ///
    /// Selector 0 is the reset: it stops at the jump table and puts no
    /// selector byte on the wire. Reset and voltage deactivation are accepted
    /// from any state.
    pub fn handshake(&mut self, selector: u8) -> Result<()> {
        let always_allowed = selector == commands::RESET || selector == commands::VOLTAGES_OFF;
        match self.state {
            SessionState::Closed if !always_allowed => {
                return Err(Error::ProtocolUsage(format!(
                    "command {} issued before the session was reset",
                    selector
                )));
            }
            SessionState::CommandSelected(_) | SessionState::Transfer(_) if !always_allowed => {
                return Err(Error::ProtocolUsage(format!(
                    "cannot select command {} while {}; reset first",
                    selector, self.state
                )));
            }
            _ => {}
        }

        if let Err(e) = self.wake() {
            self.set_state(SessionState::Closed);
            return Err(e);
        }
        self.set_state(SessionState::JumpTableEntered);
        if selector == commands::RESET {
            log::trace!("select {}", Command::Reset);
            self.set_state(SessionState::Idle);
            return Ok(());
        }
        self.select(selector)?;
        self.set_state(SessionState::CommandSelected(selector));
        Ok(())
    }

    fn wake(&mut self) -> Result<()> {
        self.write(&[tokens::WAKE])?;
        self.expect(tokens::WAKE_ACK, timing::HANDSHAKE, "handshake", "'Q'")?;
        self.write(&[tokens::JUMP])?;
        self.expect(tokens::JUMP, timing::DEFAULT, "jump table entry", "'P'")
    }

    pub fn reset(&mut self) -> Result<()> {
        self.handshake(commands::RESET)
    }

    /// Write a bare selector from the jump table, followed by its parameters.
    pub fn send_selector(&mut self, selector: u8, params: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::VoltagesActive => {}
            SessionState::Closed => {
                return Err(Error::ProtocolUsage(format!(
                    "command {} issued before the session was reset",
                    selector
                )));
            }
            state => {
                return Err(Error::ProtocolUsage(format!(
                    "command {} issued while {}; reset first",
                    selector, state
                )));
            }
        }
        self.select(selector)?;
        self.set_state(SessionState::CommandSelected(selector));
        if !params.is_empty() {
            self.write(params)?;
        }
        Ok(())
    }

    /// Like `send_selector`, for commands that need the programming voltages.
    pub fn begin_transfer(&mut self, selector: u8, params: &[u8]) -> Result<()> {
        if self.state != SessionState::VoltagesActive {
            return Err(Error::ProtocolUsage(format!(
                "memory command {} needs active programming voltages, session is {}",
                selector, self.state
            )));
        }
        self.select(selector)?;
        self.set_state(SessionState::Transfer(selector));
        if !params.is_empty() {
            self.write(params)?;
        }
        Ok(())
    }

    /// The firmware is back at its jump table with voltages still on.
    pub fn end_transfer(&mut self) {
        if let SessionState::Transfer(_) = self.state {
            self.set_state(SessionState::VoltagesActive);
        }
    }

    pub fn voltages_on(&mut self, selector: u8, operation: &'static str) -> Result<()> {
        self.handshake(selector)?;
        self.expect(tokens::VOLTAGES_ON, timing::DEFAULT, operation, "'V'")?;
        self.set_state(SessionState::VoltagesActive);
        Ok(())
    }

    pub fn voltages_off(&mut self) -> Result<()> {
        self.handshake(commands::VOLTAGES_OFF)?;
        self.expect(tokens::VOLTAGES_OFF, timing::DEFAULT, "deactivate voltages", "'v'")?;
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Collect up to `expected` bytes in packet-sized reads.
    ///
    /// A read that returns nothing ends the stream early.
    pub fn read_stream(&mut self, expected: usize) -> Result<MemoryDump> {
        let mut data = Vec::with_capacity(expected);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        while data.len() < expected {
            let want = (expected - data.len()).min(MAX_PACKET_SIZE);
            let ret = self.transport.read(&mut buf[..want], timing::READ_SLICE);
            let n = self.check(ret)?;
            if n == 0 {
                break;
            }
            log::debug!("<= {}", hex::encode(&buf[..n]));
            data.extend_from_slice(&buf[..n]);
        }
        let dump = MemoryDump::new(data, expected);
        if dump.is_short() {
            log::warn!("read stream ended after {} of {} bytes", dump.len(), expected);
        }
        Ok(dump)
    }
}

/// The operation set every programmer command set answers.
///
/// Apart from `start_protocol` and `reset`, operations expect a session that
/// has been reset and had its program variables sent. On error the engine
/// does not switch voltages off or reset; the caller is expected to issue
/// `deactivate_voltages` and `reset` itself.
pub trait ProtocolEngine {
    fn variant(&self) -> ProtocolVariant;

    fn state(&self) -> SessionState;

    /// Check that the programmer firmware answers at all.
    fn start_protocol(&mut self) -> Result<bool>;

    /// Return the firmware to its jump table.
    fn reset(&mut self) -> Result<()>;

    fn echo(&mut self, value: u8) -> Result<u8>;

    fn init_program_vars(&mut self, chip: &ChipProfile) -> Result<()>;

    fn activate_voltages(&mut self) -> Result<()>;

    fn deactivate_voltages(&mut self) -> Result<()>;

    /// Power-cycle the programming rails without leaving the session.
    fn reinitialize_voltages(&mut self) -> Result<()>;

    fn program_rom(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()>;

    fn program_eeprom(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()>;

    fn program_fuses_id(&mut self, chip: &ChipProfile, image: &FirmwareImage) -> Result<()>;

    fn program_calibration(
        &mut self,
        chip: &ChipProfile,
        calibration: u16,
        fuses: u16,
    ) -> Result<()>;

    fn read_rom(&mut self, chip: &ChipProfile) -> Result<MemoryDump>;

    fn read_eeprom(&mut self, chip: &ChipProfile) -> Result<MemoryDump>;

    fn read_config(&mut self) -> Result<MemoryDump>;

    /// `None` when the command set has no calibration read.
    fn read_calibration(&mut self, chip: &ChipProfile) -> Result<Option<MemoryDump>>;

    fn erase(&mut self) -> Result<()>;

    /// `Ok(false)` is a successful "not blank" answer.
    fn rom_is_blank(&mut self, chip: &ChipProfile) -> Result<bool>;

    fn eeprom_is_blank(&mut self) -> Result<bool>;

    fn fuses_ready(&mut self) -> Result<bool>;

    fn chip_in_socket(&mut self) -> Result<bool>;

    fn chip_out_of_socket(&mut self) -> Result<bool>;

    /// `None` for a model code outside the known table.
    fn programmer_version(&mut self) -> Result<Option<ProgrammerModel>>;

    fn protocol_id(&mut self) -> Result<ProtocolId>;

    fn program_debug_vector(&mut self, address: u32) -> Result<()>;

    fn read_debug_vector(&mut self) -> Result<u32>;

    fn program_10f_calibration(&mut self, calibration: u16, fuses: u16) -> Result<()>;
}

/// Command sets known to the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVariant {
    #[default]
    P018,
    /// Older firmware; only the handshake is wired up.
    P014,
}

impl ProtocolVariant {
    pub const fn name(self) -> &'static str {
        match self {
            ProtocolVariant::P018 => "P018",
            ProtocolVariant::P014 => "P014",
        }
    }

    /// Build the engine for this variant on top of `transport`.
    pub fn open<T: Transport + 'static>(self, transport: T) -> Box<dyn ProtocolEngine> {
        match self {
            ProtocolVariant::P018 => Box::new(P018::new(transport)),
            ProtocolVariant::P014 => Box::new(P014::new(transport)),
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl clap::ValueEnum for ProtocolVariant {
    fn value_variants<'a>() -> &'a [Self] {
        &[ProtocolVariant::P018, ProtocolVariant::P014]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        use clap::builder::PossibleValue;

        match self {
            ProtocolVariant::P018 => Some(PossibleValue::new("p018").aliases(["P018", "18"])),
            ProtocolVariant::P014 => Some(PossibleValue::new("p014").aliases(["P014", "14"])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_runs_the_wake_handshake() {
        let mut link = Link::new(ScriptedTransport::new().replies(b"QP"));
        link.reset().unwrap();
        assert_eq!(link.state(), SessionState::Idle);
        assert_eq!(link.transport().written(), vec![0x01, b'P']);
    }

    #[test]
    fn handshake_failure_closes_the_session() {
        let mut link = Link::new(ScriptedTransport::new().replies(b"X"));
        match link.reset() {
            Err(Error::UnexpectedResponse { received, .. }) => assert_eq!(received, b"X"),
            other => panic!("expected handshake failure, got {:?}", other),
        }
        assert_eq!(link.state(), SessionState::Closed);
        // no jump request after a bad wake answer
        assert_eq!(link.transport().written(), vec![0x01]);
    }

    #[test]
    fn selector_needs_a_reset_session() {
        let mut link = Link::new(ScriptedTransport::new().replies(b"QP"));
        assert!(matches!(
            link.send_selector(commands::ERASE_CHECK, &[]),
            Err(Error::ProtocolUsage(_))
        ));
        assert!(link.transport().writes().is_empty());

        link.reset().unwrap();
        link.send_selector(commands::VERSION, &[]).unwrap();
        assert_eq!(link.state(), SessionState::CommandSelected(commands::VERSION));
        // a second command without reset is a usage error
        assert!(matches!(
            link.send_selector(commands::PROTOCOL_ID, &[]),
            Err(Error::ProtocolUsage(_))
        ));
        assert!(matches!(
            link.handshake(commands::VOLTAGES_ON),
            Err(Error::ProtocolUsage(_))
        ));
    }

    #[test]
    fn voltages_need_a_reset_session() {
        let mut link = Link::new(ScriptedTransport::new().replies(b"QPv"));
        assert!(matches!(
            link.voltages_on(commands::VOLTAGES_ON, "activate voltages"),
            Err(Error::ProtocolUsage(_))
        ));
        assert!(matches!(
            link.handshake(commands::INIT_PROGRAM_VARS),
            Err(Error::ProtocolUsage(_))
        ));
        assert!(link.transport().writes().is_empty());
        assert_eq!(link.state(), SessionState::Closed);

        // switching voltages off stays possible after a failure
        link.voltages_off().unwrap();
        assert_eq!(link.state(), SessionState::Idle);
        assert_eq!(
            link.transport().written(),
            vec![0x01, b'P', commands::VOLTAGES_OFF]
        );
    }

    #[test]
    fn transfer_needs_voltages() {
        let mut link = Link::new(ScriptedTransport::new().replies(b"QP"));
        link.reset().unwrap();
        assert!(matches!(
            link.begin_transfer(commands::PROGRAM_ROM, &[0, 1]),
            Err(Error::ProtocolUsage(_))
        ));
        assert_eq!(link.state(), SessionState::Idle);
    }

    #[test]
    fn probe_tolerates_trailing_bytes() {
        let mut link = Link::new(ScriptedTransport::new().reply(b"PPP"));
        assert!(link.probe().unwrap());
        assert_eq!(link.transport().pending(), 0);
        assert_eq!(link.state(), SessionState::Closed);

        let mut link = Link::new(ScriptedTransport::new().reply(b"?"));
        assert!(!link.probe().unwrap());
    }

    #[test]
    fn read_stream_stops_on_empty_read() {
        let mut link = Link::new(ScriptedTransport::new().reply(&[0xaa; 70]).reply(&[0xbb; 10]));
        let dump = link.read_stream(200).unwrap();
        assert_eq!(dump.len(), 80);
        assert!(dump.is_short());

        let mut link = Link::new(ScriptedTransport::new().reply(&[0x11; 40]));
        let dump = link.read_stream(26).unwrap();
        assert_eq!(dump.len(), 26);
        assert!(!dump.is_short());
        assert_eq!(link.transport().pending(), 14);
    }

    #[test]
    fn variant_opens_matching_engine() {
        let engine = ProtocolVariant::P014.open(ScriptedTransport::new());
        assert_eq!(engine.variant(), ProtocolVariant::P014);
        assert_eq!(engine.state(), SessionState::Closed);
    }
}
