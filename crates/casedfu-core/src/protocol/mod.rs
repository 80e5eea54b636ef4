//! Protocol module - S-record codec and device response matching.

pub mod constants;
pub mod header;
pub mod options;
pub mod record;
pub mod response;

pub use constants::*;
pub use header::{HeaderError, ImageHeader, make_boot_header, make_header, make_terminator};
pub use options::DfuOptions;
pub use record::{Record, RecordError, RecordKind};
pub use response::{DeviceResponse, ResponseMatcher, Slot, TextMatcher};
