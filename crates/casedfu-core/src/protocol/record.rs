//! S-record codec.
//!
//! A composite image carries three record kinds:
//! - `S0` header (16-bit address field)
//! - `S3` data (32-bit address field)
//! - `S7` terminator (32-bit start address)
//!
//! Every line is `S<kind><count><address><payload><checksum>` in hex, where
//! `count` covers the address, payload and checksum bytes and the checksum is
//! the complemented low byte of the sum of count, address and payload.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid record '{line}': {reason}")]
    InvalidRecord { line: String, reason: String },
    #[error("Unknown record kind '{0}'")]
    UnknownRecordKind(String),
    #[error("Payload too long for {kind} record: {len} bytes, maximum {max}")]
    PayloadTooLong {
        kind: RecordKind,
        len: usize,
        max: usize,
    },
    #[error("Address 0x{address:08X} does not fit a {kind} record")]
    AddressOutOfRange { kind: RecordKind, address: u32 },
}

/// The record kinds a composite image is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Header,
    Data,
    Terminator,
}

impl RecordKind {
    pub fn marker(&self) -> &'static str {
        match self {
            RecordKind::Header => MARKER_HEADER,
            RecordKind::Data => MARKER_DATA,
            RecordKind::Terminator => MARKER_TERMINATOR,
        }
    }

    pub fn from_marker(marker: &str) -> Result<Self, RecordError> {
        match marker {
            MARKER_HEADER => Ok(RecordKind::Header),
            MARKER_DATA => Ok(RecordKind::Data),
            MARKER_TERMINATOR => Ok(RecordKind::Terminator),
            other => Err(RecordError::UnknownRecordKind(other.to_string())),
        }
    }

    /// Width of the address field in bytes.
    pub fn address_len(&self) -> usize {
        match self {
            RecordKind::Header => HEADER_ADDRESS_LEN,
            RecordKind::Data => DATA_ADDRESS_LEN,
            RecordKind::Terminator => TERMINATOR_ADDRESS_LEN,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        MAX_RECORD_COUNT - self.address_len() - 1
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Header => write!(f, "header"),
            RecordKind::Data => write!(f, "data"),
            RecordKind::Terminator => write!(f, "terminator"),
        }
    }
}

/// One S-record line.
///
/// The checksum is never stored; it is derived from the other fields on
/// every encode, so a `Record` value cannot carry a wrong one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    kind: RecordKind,
    address: u32,
    payload: Vec<u8>,
}

impl Record {
    pub fn new(kind: RecordKind, address: u32, payload: Vec<u8>) -> Result<Self, RecordError> {
        let max = kind.max_payload_len();
        if payload.len() > max {
            return Err(RecordError::PayloadTooLong {
                kind,
                len: payload.len(),
                max,
            });
        }
        if kind.address_len() < 4 && address >> (kind.address_len() * 8) != 0 {
            return Err(RecordError::AddressOutOfRange { kind, address });
        }
        Ok(Self {
            kind,
            address,
            payload,
        })
    }

    /// Build an `S3` data record.
    pub fn data(address: u32, payload: Vec<u8>) -> Result<Self, RecordError> {
        Self::new(RecordKind::Data, address, payload)
    }

    /// Constructor for payloads already known to fit.
    pub(crate) fn from_parts(kind: RecordKind, address: u32, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= kind.max_payload_len());
        Self {
            kind,
            address,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_terminator(&self) -> bool {
        self.kind == RecordKind::Terminator
    }

    /// Count, address and payload bytes: everything the checksum covers.
    fn summed_bytes(&self) -> Vec<u8> {
        let addr_len = self.kind.address_len();
        let mut bytes = Vec::with_capacity(1 + addr_len + self.payload.len() + 1);
        bytes.push((addr_len + self.payload.len() + 1) as u8);
        bytes.extend_from_slice(&self.address.to_be_bytes()[4 - addr_len..]);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn checksum(&self) -> u8 {
        checksum_of(&self.summed_bytes())
    }

    /// Serialize to the textual line form, without line terminator.
    pub fn encode(&self) -> String {
        let mut bytes = self.summed_bytes();
        let checksum = checksum_of(&bytes);
        bytes.push(checksum);
        format!("{}{}", self.kind.marker(), hex::encode_upper(bytes))
    }

    /// Parse one textual line.
    ///
    /// Surrounding whitespace (including CR/LF) is ignored and hex digits may
    /// be in either case. The count field and the checksum are both verified.
    pub fn decode(line: &str) -> Result<Self, RecordError> {
        let line = line.trim();
        let (Some(marker), Some(body)) = (line.get(..2), line.get(2..)) else {
            return Err(invalid(line, "line too short"));
        };
        if !marker.starts_with('S') {
            return Err(invalid(line, "missing 'S' marker"));
        }
        let kind = RecordKind::from_marker(marker)?;

        let bytes = hex::decode(body).map_err(|e| invalid(line, e.to_string()))?;
        let Some((&count, rest)) = bytes.split_first() else {
            return Err(invalid(line, "missing count field"));
        };
        if count as usize != rest.len() {
            return Err(invalid(
                line,
                format!("count field {} does not match {} bytes", count, rest.len()),
            ));
        }
        let addr_len = kind.address_len();
        if rest.len() < addr_len + 1 {
            return Err(invalid(line, "record shorter than its address field"));
        }

        let (summed, stored) = bytes.split_at(bytes.len() - 1);
        let expected = checksum_of(summed);
        if stored[0] != expected {
            return Err(invalid(
                line,
                format!(
                    "checksum 0x{:02X}, expected 0x{:02X}",
                    stored[0], expected
                ),
            ));
        }

        let address = summed[1..1 + addr_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);

        Ok(Self {
            kind,
            address,
            payload: summed[1 + addr_len..].to_vec(),
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Record {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn checksum_of(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn invalid(line: &str, reason: impl Into<String>) -> RecordError {
    RecordError::InvalidRecord {
        line: line.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_record() {
        let record = Record::decode("S30D0800000012345678DEADBEEF9E").unwrap();
        assert_eq!(record.kind(), RecordKind::Data);
        assert_eq!(record.address(), 0x0800_0000);
        assert_eq!(
            record.payload(),
            &[0x12, 0x34, 0x56, 0x78, 0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(record.checksum(), 0x9E);
    }

    #[test]
    fn test_encode_data_record() {
        let record = Record::data(0x0800_0000, vec![0x00, 0x10, 0x00, 0x20]).unwrap();
        assert_eq!(record.encode(), "S3090800000000100020BE");
        assert_eq!(record.to_string(), "S3090800000000100020BE");
    }

    #[test]
    fn test_roundtrip() {
        let payloads: [&[u8]; 4] = [&[], &[0xFF], &[0x01, 0x02, 0x03, 0x04], &[0xA5; 64]];
        for payload in payloads {
            let record = Record::data(0x0800_8000, payload.to_vec()).unwrap();
            let decoded = Record::decode(&record.encode()).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_decode_tolerates_case_and_line_endings() {
        let record: Record = "S30d0800000012345678deadbeef9e\r\n".parse().unwrap();
        assert_eq!(record.address(), 0x0800_0000);
        assert_eq!(record.encode(), "S30D0800000012345678DEADBEEF9E");
    }

    #[test]
    fn test_decode_terminator() {
        let record = Record::decode(TERMINATOR_LINE).unwrap();
        assert!(record.is_terminator());
        assert_eq!(record.address(), 0);
        assert!(record.payload().is_empty());
    }

    #[test]
    fn test_decode_bad_checksum() {
        let err = Record::decode("S30D0800000012345678DEADBEEF9F").unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { .. }));
    }

    #[test]
    fn test_decode_count_mismatch() {
        // Count says 0x0E but only 0x0D bytes follow.
        let err = Record::decode("S30E0800000012345678DEADBEEF9E").unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { .. }));
    }

    #[test]
    fn test_decode_bad_hex() {
        let err = Record::decode("S3090800000000100020GZ").unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { .. }));

        // Odd number of digits.
        let err = Record::decode("S309080000000010002").unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { .. }));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = Record::decode("S1130000285F245F2212226A000424290008237C2A").unwrap_err();
        assert_eq!(err, RecordError::UnknownRecordKind("S1".into()));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Record::decode(":10010000214601360121470136007EFE09D21901"),
            Err(RecordError::InvalidRecord { .. })
        ));
        assert!(matches!(
            Record::decode(""),
            Err(RecordError::InvalidRecord { .. })
        ));
        // Count present but too short for a 32-bit address.
        assert!(matches!(
            Record::decode("S30200FD"),
            Err(RecordError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_payload_too_long() {
        let max = RecordKind::Data.max_payload_len();
        assert!(Record::data(0, vec![0; max]).is_ok());
        let err = Record::data(0, vec![0; max + 1]).unwrap_err();
        assert!(matches!(err, RecordError::PayloadTooLong { len, .. } if len == max + 1));
    }

    #[test]
    fn test_header_address_range() {
        assert!(Record::new(RecordKind::Header, 0xFFFF, vec![]).is_ok());
        let err = Record::new(RecordKind::Header, 0x1_0000, vec![]).unwrap_err();
        assert!(matches!(err, RecordError::AddressOutOfRange { .. }));
    }
}
