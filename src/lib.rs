//! K150 / P018 PIC programmer protocol implementation.

pub mod constants;
pub mod device;
pub mod engine;
pub mod error;
pub mod flashing;
pub mod image;
pub mod protocol;
pub mod transport;

pub use self::device::{Chip, ChipDB, ChipProfile};
pub use self::engine::{ProtocolEngine, ProtocolVariant, SessionState};
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::image::FirmwareImage;
pub use self::protocol::{Command, MemoryDump, Response};
pub use self::transport::Transport;
