//! Composite images: header, fragment records, terminator.
//!
//! Two layouts are produced:
//! - DFU image: CRC-carrying header, slot A records, slot B records. The
//!   device only takes the slot it is not running from.
//! - Factory image: minimal header, bootloader records, application records.
//!   Flashed whole; no CRCs.

use std::path::Path;

use tracing::{debug, info, instrument};

use super::{FirmwareFragment, ImageError};
use crate::crc32::{crc32, crc32_records};
use crate::protocol::{
    CRLF, HeaderError, ImageHeader, Record, RecordKind, Slot, make_boot_header, make_header,
    make_terminator,
};

/// What a run of data records in an image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRole {
    SlotA,
    SlotB,
    Bootloader,
    Application,
}

impl SectionRole {
    pub fn slot(&self) -> Option<Slot> {
        match self {
            SectionRole::SlotA => Some(Slot::A),
            SectionRole::SlotB => Some(Slot::B),
            SectionRole::Bootloader | SectionRole::Application => None,
        }
    }
}

/// Data records of one fragment, in transfer order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSection {
    pub role: SectionRole,
    pub records: Vec<Record>,
}

/// One header, the sections' data records, one terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeImage {
    header: Record,
    sections: Vec<ImageSection>,
    terminator: Record,
}

/// Build the DFU image for both application slots.
///
/// The header carries the CRC of each slot so the bootloader can check the
/// one it receives.
#[instrument(level = "debug", skip(fragment_a, fragment_b))]
pub fn build_dual_image(
    variant_name: &str,
    fragment_a: &FirmwareFragment,
    fragment_b: &FirmwareFragment,
) -> Result<CompositeImage, ImageError> {
    let crc_a = crc32(fragment_a)?;
    let crc_b = crc32(fragment_b)?;
    info!(
        variant = variant_name,
        crc_a = %format!("0x{:08X}", crc_a),
        crc_b = %format!("0x{:08X}", crc_b),
        "Building DFU image"
    );

    Ok(CompositeImage {
        header: make_header(variant_name, crc_a, crc_b),
        sections: vec![
            ImageSection {
                role: SectionRole::SlotA,
                records: fragment_a.records().to_vec(),
            },
            ImageSection {
                role: SectionRole::SlotB,
                records: fragment_b.records().to_vec(),
            },
        ],
        terminator: make_terminator(),
    })
}

/// Build the factory image: bootloader followed by the slot A application.
///
/// The header is the fixed factory one; `variant_name` is only logged.
pub fn build_boot_image(
    variant_name: &str,
    boot_fragment: &FirmwareFragment,
    app_fragment: &FirmwareFragment,
) -> CompositeImage {
    info!(variant = variant_name, "Building factory image");
    CompositeImage {
        header: make_boot_header(),
        sections: vec![
            ImageSection {
                role: SectionRole::Bootloader,
                records: boot_fragment.records().to_vec(),
            },
            ImageSection {
                role: SectionRole::Application,
                records: app_fragment.records().to_vec(),
            },
        ],
        terminator: make_terminator(),
    }
}

impl CompositeImage {
    pub fn header(&self) -> &Record {
        &self.header
    }

    pub fn sections(&self) -> &[ImageSection] {
        &self.sections
    }

    pub fn terminator(&self) -> &Record {
        &self.terminator
    }

    /// Every record in file order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        std::iter::once(&self.header)
            .chain(self.sections.iter().flat_map(|s| s.records.iter()))
            .chain(std::iter::once(&self.terminator))
    }

    /// Header and terminator included.
    pub fn record_count(&self) -> usize {
        2 + self.sections.iter().map(|s| s.records.len()).sum::<usize>()
    }

    /// Records to send to a device running from `active`.
    ///
    /// The active slot's section is left out; the header, the terminator and
    /// every other section are kept in order.
    pub fn transfer_records(&self, active: Option<Slot>) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.record_count());
        records.push(self.header.clone());
        for section in &self.sections {
            if active.is_some() && section.role.slot() == active {
                debug!(role = ?section.role, records = section.records.len(), "Dropping active slot");
                continue;
            }
            records.extend(section.records.iter().cloned());
        }
        records.push(self.terminator.clone());
        records
    }

    pub fn image_header(&self) -> Result<ImageHeader, HeaderError> {
        ImageHeader::from_record(&self.header)
    }

    fn section(&self, role: SectionRole) -> Option<&ImageSection> {
        self.sections.iter().find(|s| s.role == role)
    }

    /// Recompute both slot CRCs and compare them with the header.
    pub fn verify(&self) -> Result<(), ImageError> {
        let header = self.image_header()?;
        for (slot, role, expected) in [
            (Slot::A, SectionRole::SlotA, header.crc_a),
            (Slot::B, SectionRole::SlotB, header.crc_b),
        ] {
            let records = self.section(role).map(|s| s.records.as_slice()).unwrap_or(&[]);
            let actual = crc32_records(records)?;
            if actual != expected {
                return Err(ImageError::CrcMismatch {
                    slot,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Render the image as S-record text with CRLF line endings.
    pub fn to_srec(&self) -> String {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&record.encode());
            out.push_str(CRLF);
        }
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ImageError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_srec())?;
        info!(path = %path.display(), records = self.record_count(), "Wrote composite image");
        Ok(())
    }

    /// Read back a DFU image.
    ///
    /// The file does not mark where slot A ends, so the data records are split
    /// in two equal halves, A first. Both slots are built from the same
    /// sources and always have the same record count; `verify` catches an
    /// image where that does not hold.
    pub fn parse_dual(text: &str) -> Result<Self, ImageError> {
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = Record::decode(line).map_err(|source| ImageError::Record {
                line: n + 1,
                source,
            })?;
            records.push(record);
        }

        let Some(terminator) = records.pop().filter(|r| r.kind() == RecordKind::Terminator)
        else {
            return Err(ImageError::MissingTerminator);
        };
        if records.first().map(|r| r.kind()) != Some(RecordKind::Header) {
            return Err(ImageError::MissingHeader);
        }
        let mut data = records.split_off(1);
        let header = records.remove(0);

        if let Some((index, record)) = data
            .iter()
            .enumerate()
            .find(|(_, r)| r.kind() != RecordKind::Data)
        {
            return Err(ImageError::UnexpectedRecord {
                index: index + 1,
                kind: record.kind(),
            });
        }
        if data.len() % 2 != 0 {
            return Err(ImageError::UnbalancedSlots { count: data.len() });
        }

        let slot_b = data.split_off(data.len() / 2);
        debug!(slot_a = data.len(), slot_b = slot_b.len(), "Parsed DFU image");

        Ok(Self {
            header,
            sections: vec![
                ImageSection {
                    role: SectionRole::SlotA,
                    records: data,
                },
                ImageSection {
                    role: SectionRole::SlotB,
                    records: slot_b,
                },
            ],
            terminator,
        })
    }

    pub fn load_dual<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading DFU image");
        let text = std::fs::read_to_string(path)?;
        Self::parse_dual(&text)
    }
}
