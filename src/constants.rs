//! Wire-level constants of the P018 command set.

use std::time::Duration;

/// Largest single read issued while streaming memory back from the programmer.
pub const MAX_PACKET_SIZE: usize = 64;

/// ROM is transferred in blocks of 16 words.
pub const ROM_BLOCK_SIZE: usize = 32;
/// EEPROM is transferred one 2-byte pair at a time.
pub const EEPROM_BLOCK_SIZE: usize = 2;
/// Payload length of the config-data read.
pub const CONFIG_DATA_SIZE: usize = 26;
/// Parameter byte sent along with the ROM erase-check selector.
pub const ROM_BLANK_HIGH_BYTE: u8 = 0x3f;

pub mod commands {
    pub const RESET: u8 = 0;
    pub const ECHO: u8 = 2;
    pub const INIT_PROGRAM_VARS: u8 = 3;
    pub const VOLTAGES_ON: u8 = 4;
    pub const VOLTAGES_OFF: u8 = 5;
    pub const CYCLE_VOLTAGES: u8 = 6;
    pub const PROGRAM_ROM: u8 = 7;
    pub const PROGRAM_EEPROM: u8 = 8;
    pub const PROGRAM_FUSES_ID: u8 = 9;
    pub const READ_ROM: u8 = 11;
    pub const READ_EEPROM: u8 = 12;
    pub const READ_CONFIG: u8 = 13;
    pub const ERASE: u8 = 14;
    pub const ERASE_CHECK: u8 = 16;
    pub const FUSES_READY: u8 = 17;
    pub const DETECT_IN_SOCKET: u8 = 18;
    pub const DETECT_OUT_OF_SOCKET: u8 = 19;
    pub const VERSION: u8 = 20;
    pub const PROTOCOL_ID: u8 = 21;
    pub const PROGRAM_DEBUG_VECTOR: u8 = 22;
    pub const READ_DEBUG_VECTOR: u8 = 23;
}

pub mod tokens {
    /// First byte of the jump-table handshake.
    pub const WAKE: u8 = 0x01;
    pub const WAKE_ACK: u8 = b'Q';
    pub const JUMP: u8 = b'P';

    pub const ACK: u8 = b'Y';
    pub const NACK: u8 = b'N';
    pub const VOLTAGES_ON: u8 = b'V';
    pub const VOLTAGES_OFF: u8 = b'v';
    pub const VARS_ACCEPTED: u8 = b'I';
    pub const PROGRAM_DONE: u8 = b'P';
    pub const CONFIG_READY: u8 = b'C';
    pub const DETECT_STARTED: u8 = b'A';
    pub const NOT_BLANK: u8 = b'C';
    pub const FUSES_BUSY: u8 = b'B';
    pub const STILL_SCANNING: u8 = 0xff;
    pub const DEBUG_VECTOR: u8 = 0xef;
}

pub mod timing {
    use super::Duration;

    pub const HANDSHAKE: Duration = Duration::from_millis(500);
    pub const DEFAULT: Duration = Duration::from_millis(100);
    pub const EXTENDED: Duration = Duration::from_millis(500);
    pub const WRITE: Duration = Duration::from_millis(100);

    /// Sleep between zero-byte reads inside `read_exact`.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
    /// Upper bound of a single underlying read call.
    pub const READ_SLICE: Duration = Duration::from_millis(100);
    pub const DRAIN: Duration = Duration::from_millis(50);
    pub const DRAIN_MAX_READS: usize = 1024;
}
