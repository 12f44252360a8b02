//! Protocol implementations.

pub mod command;
pub mod crc;

// Re-export common types
pub use command::{CommandPacket, Opcode, ResetMode, Session, StatusPacket};
pub use crc::{crc16, crc32};
