// Record markers
pub const MARKER_HEADER: &str = "S0";
pub const MARKER_DATA: &str = "S3";
pub const MARKER_TERMINATOR: &str = "S7";

// Address field widths, in bytes
pub const HEADER_ADDRESS_LEN: usize = 2;
pub const DATA_ADDRESS_LEN: usize = 4;
pub const TERMINATOR_ADDRESS_LEN: usize = 4;

/// Largest value the one-byte count field can carry.
pub const MAX_RECORD_COUNT: usize = 0xFF;

/// Terminator line as it appears in every composite image.
pub const TERMINATOR_LINE: &str = "S70500000000FA";

/// Factory image header payload. Every variant carries the same one.
pub const BOOT_HEADER_ID: &[u8] = b"CB";
/// Factory image header as it appears in every factory image.
pub const BOOT_HEADER_LINE: &str = "S0050000434275";

/// Variant name slots in the dual-image header.
pub const HEADER_VARIANT_LEN: usize = 7;
/// crc_a (4) + crc_b (4) + variant (7) + NUL (1).
pub const HEADER_PAYLOAD_LEN: usize = 16;

// Line endings
pub const CRLF: &str = "\r\n";

// Handshake option bits
pub const OPT_BEGIN: u8 = 0x01;
pub const OPT_DISABLE_TIMEOUT: u8 = 0x04;
pub const OPT_INJECT_NACK: u8 = 0x08;
pub const OPT_OVERRIDE_COMPATIBILITY: u8 = 0x10;

pub const HANDSHAKE_COMMAND: &str = "dfu";

// Device response markers
pub const RESP_READY: &str = "Ready";
pub const RESP_SLOT_A: &str = "(A)";
pub const RESP_SLOT_B: &str = "(B)";
pub const RESP_ACK: &str = "ACK";
pub const RESP_NACK: &str = "NACK";
pub const RESP_COMPLETE: &str = "Complete";
pub const RESP_ERROR: &str = "Error";
pub const RESP_DIVIDER: &str = "------";

/// Tag the charger case firmware puts on its DFU log lines.
pub const DEVICE_LINE_PREFIX: &str = "DFU: ";

// Timing defaults
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5;
