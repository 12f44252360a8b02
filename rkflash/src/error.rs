//! Error types for rkflash.

use std::io;
use thiserror::Error;

/// Result type for rkflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rkflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (source/sink, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bulk channel failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device answered outside the command/payload/status contract.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed container, parameter block or wrapped image.
    #[error("Invalid format: {0}")]
    Format(#[from] FormatError),

    /// Partition table text did not match the expected layout.
    #[error("Partition table: {0}")]
    Syntax(#[from] SyntaxError),

    /// Transfer request that cannot be issued as given.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No device in bootloader mode was found.
    #[error("No Rockchip device found in bootloader mode")]
    DeviceNotFound,

    /// Unsupported region or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error only aborts the current operation.
    ///
    /// Partition lookups that fail on the table text are reported and the
    /// caller may carry on with other work.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }
}

/// Bulk channel failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Sending a buffer failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Receiving a buffer failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Opening or claiming the device failed.
    #[error("open failed: {0}")]
    Open(String),

    /// The channel is closed.
    #[error("channel closed")]
    Closed,
}

/// Command exchange errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Status packet missing or of the wrong size.
    #[error("status packet failed: expected {expected} bytes, got {actual}")]
    StatusFailed {
        /// Expected status length.
        expected: usize,
        /// Received length (0 when the receive itself failed).
        actual: usize,
        /// Channel failure that lost the status, if any.
        source: Option<TransportError>,
    },

    /// Data phase returned fewer bytes than the command asked for.
    #[error("short payload: expected {expected} bytes, got {actual}")]
    ShortPayload {
        /// Requested payload length.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// Packet that is not a command block.
    #[error("malformed command packet: {0}")]
    BadCommand(String),
}

/// Binary layout errors.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Unrecognized leading magic.
    #[error("invalid signature {0:?}")]
    BadMagic(String),

    /// A required tag was not found at its computed offset.
    #[error("cannot find {tag} signature at {offset:#010x}")]
    MissingSignature {
        /// Tag that was expected.
        tag: &'static str,
        /// Offset where it was expected.
        offset: usize,
    },

    /// A field or payload points past the end of the input.
    #[error("{what} out of bounds (offset {offset:#x}, length {length:#x}, input {available:#x})")]
    Truncated {
        /// What was being read.
        what: String,
        /// Start offset.
        offset: usize,
        /// Requested length.
        length: usize,
        /// Bytes available.
        available: usize,
    },

    /// CRC32 trailer mismatch.
    #[error("bad CRC: stored {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch {
        /// Stored CRC value.
        expected: u32,
        /// Computed CRC value.
        actual: u32,
    },

    /// Parameter block length outside `0..=MAX_PARAM_LENGTH`.
    #[error("Bad parameter length {0:#x}")]
    BadParameterLength(u32),

    /// Header field with an impossible value.
    #[error("{0}")]
    InvalidField(String),

    /// Entry path that would escape the output directory.
    #[error("unsafe entry path {0:?}")]
    UnsafePath(String),
}

/// mtdparts lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    /// The parameter text carries no `mtdparts=` definition.
    #[error("'mtdparts' not found in command line")]
    MissingMtdparts,

    /// No `(name)` token in the partition list.
    #[error("partition '{0}' not found")]
    PartitionNotFound(String),

    /// Descriptor does not match any known delimiter pattern.
    #[error("bad syntax in mtdparts near '{0}'")]
    BadSyntax(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_errors_are_soft() {
        let err: Error = SyntaxError::PartitionNotFound("boot".into()).into();
        assert!(err.is_soft());

        let err: Error = FormatError::BadMagic("XXXX".into()).into();
        assert!(!err.is_soft());
    }

    #[test]
    fn test_status_failed_message() {
        let err = ProtocolError::StatusFailed {
            expected: 13,
            actual: 0,
            source: Some(TransportError::Closed),
        };
        assert_eq!(
            err.to_string(),
            "status packet failed: expected 13 bytes, got 0"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
