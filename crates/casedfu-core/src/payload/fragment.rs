//! Compiled firmware fragments.
//!
//! A fragment is the `S3` content of one toolchain-produced S-record file
//! (bootloader, slot A build or slot B build). Anything else the toolchain
//! writes, such as its own `S0` banner or `S5`/`S7` trailer, is dropped.

use std::path::Path;

use tracing::{debug, info};

use super::ImageError;
use crate::protocol::{MARKER_DATA, Record, RecordKind};

/// Ordered data records of one compiled image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareFragment {
    records: Vec<Record>,
}

impl FirmwareFragment {
    /// Wrap already decoded records. Every record must be a data record.
    pub fn new(records: Vec<Record>) -> Result<Self, ImageError> {
        if let Some((index, record)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.kind() != RecordKind::Data)
        {
            return Err(ImageError::UnexpectedRecord {
                index,
                kind: record.kind(),
            });
        }
        Ok(Self { records })
    }

    /// Parse S-record text, keeping only the `S3` lines.
    pub fn parse(text: &str) -> Result<Self, ImageError> {
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if !line.starts_with(MARKER_DATA) {
                if !line.is_empty() {
                    skipped += 1;
                }
                continue;
            }
            let record = Record::decode(line).map_err(|source| ImageError::Record {
                line: n + 1,
                source,
            })?;
            records.push(record);
        }

        debug!(records = records.len(), skipped, "Parsed fragment");
        Ok(Self { records })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading fragment");
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total payload bytes across all records.
    pub fn payload_len(&self) -> usize {
        self.records.iter().map(|r| r.payload().len()).sum()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::make_terminator;
    use std::io::Write;

    const OBJCOPY_OUTPUT: &str = "S00F0000636861726765722E7372656339\n\
S3090800000000100020BE\n\
S309080080000102030464\n\
S70508000000F2\n";

    #[test]
    fn test_parse_keeps_only_data() {
        let fragment = FirmwareFragment::parse(OBJCOPY_OUTPUT).unwrap();
        assert_eq!(fragment.len(), 2);
        assert_eq!(fragment.records()[0].address(), 0x0800_0000);
        assert_eq!(fragment.records()[1].address(), 0x0800_8000);
        assert_eq!(fragment.payload_len(), 8);
    }

    #[test]
    fn test_parse_reports_line_number() {
        let text = "S3090800000000100020BE\r\nS309080080000102030465\r\n";
        let err = FirmwareFragment::parse(text).unwrap_err();
        assert!(matches!(err, ImageError::Record { line: 2, .. }));
    }

    #[test]
    fn test_new_rejects_non_data() {
        let data = Record::data(0, vec![1, 2, 3, 4]).unwrap();
        let err = FirmwareFragment::new(vec![data, make_terminator()]).unwrap_err();
        assert!(matches!(
            err,
            ImageError::UnexpectedRecord {
                index: 1,
                kind: RecordKind::Terminator
            }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(OBJCOPY_OUTPUT.as_bytes()).unwrap();

        let fragment = FirmwareFragment::load(file.path()).unwrap();
        assert_eq!(fragment.len(), 2);
        assert!(FirmwareFragment::load(file.path().with_extension("missing")).is_err());
    }
}
