//! Header and terminator records for composite images.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::*;
use super::record::{Record, RecordKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Expected a header record, got {0}")]
    NotAHeader(RecordKind),
    #[error("Header payload too small: expected {expected}, got {actual}")]
    PayloadTooSmall { expected: usize, actual: usize },
}

/// Build the header of a dual-slot image.
///
/// Payload layout (16 bytes):
/// - `crc_a`, byte-swapped (least significant byte first)
/// - `crc_b`, byte-swapped
/// - variant name, zero-padded to 7 bytes
/// - one zero byte
///
/// Names longer than 7 bytes are cut to their first 7 bytes without any
/// error; bootloaders in the field read exactly 7, so this stays as is.
pub fn make_header(variant_name: &str, crc_a: u32, crc_b: u32) -> Record {
    let mut payload = [0u8; HEADER_PAYLOAD_LEN];
    LittleEndian::write_u32(&mut payload[0..4], crc_a);
    LittleEndian::write_u32(&mut payload[4..8], crc_b);
    for (slot, byte) in payload[8..8 + HEADER_VARIANT_LEN]
        .iter_mut()
        .zip(variant_name.bytes())
    {
        *slot = byte;
    }
    Record::from_parts(RecordKind::Header, 0, payload.to_vec())
}

/// Header of a factory image. Fixed, whatever the variant.
pub fn make_boot_header() -> Record {
    Record::from_parts(RecordKind::Header, 0, BOOT_HEADER_ID.to_vec())
}

/// The fixed `S7` terminator, start address 0.
pub fn make_terminator() -> Record {
    Record::from_parts(RecordKind::Terminator, 0, Vec::new())
}

/// Fields carried by a dual-image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub crc_a: u32,
    pub crc_b: u32,
    pub variant: String,
}

impl ImageHeader {
    pub fn from_record(record: &Record) -> Result<Self, HeaderError> {
        if record.kind() != RecordKind::Header {
            return Err(HeaderError::NotAHeader(record.kind()));
        }
        let payload = record.payload();
        if payload.len() < HEADER_PAYLOAD_LEN {
            return Err(HeaderError::PayloadTooSmall {
                expected: HEADER_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let name = &payload[8..8 + HEADER_VARIANT_LEN];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        Ok(Self {
            crc_a: LittleEndian::read_u32(&payload[0..4]),
            crc_b: LittleEndian::read_u32(&payload[4..8]),
            variant: String::from_utf8_lossy(&name[..end]).into_owned(),
        })
    }

    pub fn to_record(&self) -> Record {
        make_header(&self.variant, self.crc_a, self.crc_b)
    }
}
