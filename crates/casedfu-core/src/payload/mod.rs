//! Payload handling module.
//!
//! Compiled fragments in, composite S-record images out.

pub mod composite;
pub mod fragment;

use thiserror::Error;

use crate::crc32::CrcError;
use crate::protocol::{HeaderError, RecordError, RecordKind, Slot};

pub use composite::{CompositeImage, ImageSection, SectionRole, build_boot_image, build_dual_image};
pub use fragment::FirmwareFragment;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: RecordError,
    },
    #[error("CRC error: {0}")]
    Crc(#[from] CrcError),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Unexpected {kind} record at position {index}")]
    UnexpectedRecord { index: usize, kind: RecordKind },
    #[error("Image does not start with a header record")]
    MissingHeader,
    #[error("Image does not end with a terminator record")]
    MissingTerminator,
    #[error("Cannot split {count} data records evenly between slot A and slot B")]
    UnbalancedSlots { count: usize },
    #[error("Slot {slot} CRC mismatch: header 0x{expected:08X}, records 0x{actual:08X}")]
    CrcMismatch { slot: Slot, expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
