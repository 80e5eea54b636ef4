//! Slot image CRC, in the convention of the target's hardware CRC unit.
//!
//! The bootloader checks a received slot with the MCU's CRC peripheral, so
//! the host computes the value the same way: every 32-bit word is
//! bit-reversed before it is folded into a standard CRC-32, and the final
//! value is bit-reversed and complemented.

use ::crc::{CRC_32_ISO_HDLC, Crc};
use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::payload::FirmwareFragment;
use crate::protocol::{Record, RecordKind};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const WORD: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrcError {
    #[error(
        "Record {index} at 0x{address:08X} has {len} payload bytes, not a multiple of 4"
    )]
    UnalignedFragment { index: usize, address: u32, len: usize },
}

/// CRC of one fragment's data records.
pub fn crc32(fragment: &FirmwareFragment) -> Result<u32, CrcError> {
    crc32_records(fragment.records())
}

/// CRC over any record sequence. Only data records contribute.
///
/// Words never span records, so every data record's payload has to be
/// word-aligned on its own.
pub fn crc32_records<'a, I>(records: I) -> Result<u32, CrcError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut digest = CRC32.digest();

    for (index, record) in records.into_iter().enumerate() {
        if record.kind() != RecordKind::Data {
            continue;
        }
        let payload = record.payload();
        if payload.len() % WORD != 0 {
            return Err(CrcError::UnalignedFragment {
                index,
                address: record.address(),
                len: payload.len(),
            });
        }
        for word in payload.chunks_exact(WORD) {
            let reversed = BigEndian::read_u32(word).reverse_bits();
            digest.update(&reversed.to_be_bytes());
        }
    }

    Ok(digest.finalize().reverse_bits() ^ 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{make_boot_header, make_terminator};

    fn fragment(payloads: &[&[u8]]) -> FirmwareFragment {
        let records = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| Record::data(0x0800_0000 + (i as u32) * 0x10, p.to_vec()).unwrap())
            .collect();
        FirmwareFragment::new(records).unwrap()
    }

    #[test]
    fn test_known_values() {
        assert_eq!(crc32(&fragment(&[])).unwrap(), 0xFFFF_FFFF);
        assert_eq!(crc32(&fragment(&[&[0, 0, 0, 0]])).unwrap(), 0xC704_DD7B);
        assert_eq!(
            crc32(&fragment(&[&[0x12, 0x34, 0x56, 0x78, 0xDE, 0xAD, 0xBE, 0xEF]])).unwrap(),
            0xAD87_5CBB
        );
    }

    #[test]
    fn test_record_boundaries_do_not_matter() {
        let one = fragment(&[&[0x12, 0x34, 0x56, 0x78, 0xDE, 0xAD, 0xBE, 0xEF]]);
        let two = fragment(&[&[0x12, 0x34, 0x56, 0x78], &[0xDE, 0xAD, 0xBE, 0xEF]]);
        assert_eq!(crc32(&one).unwrap(), crc32(&two).unwrap());
    }

    #[test]
    fn test_deterministic_and_bit_sensitive() {
        let base: Vec<u8> = (0u8..64).collect();
        let reference = crc32(&fragment(&[&base])).unwrap();
        assert_eq!(crc32(&fragment(&[&base])).unwrap(), reference);

        for byte in 0..base.len() {
            for bit in 0..8 {
                let mut flipped = base.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc32(&fragment(&[&flipped])).unwrap(), reference);
            }
        }
    }

    #[test]
    fn test_header_and_terminator_ignored() {
        let data = Record::data(0x0800_0000, vec![0x12, 0x34, 0x56, 0x78, 0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap();
        let records = [make_boot_header(), data, make_terminator()];
        assert_eq!(crc32_records(&records).unwrap(), 0xAD87_5CBB);
    }

    #[test]
    fn test_unaligned_fragment() {
        let err = crc32(&fragment(&[&[1, 2, 3, 4], &[1, 2, 3, 4, 5, 6]])).unwrap_err();
        assert_eq!(
            err,
            CrcError::UnalignedFragment {
                index: 1,
                address: 0x0800_0010,
                len: 6
            }
        );
    }
}
