//! casedfu-core: charger case firmware update tooling.
//!
//! Builds composite S-record images for the charger case's dual-slot
//! application layout and pushes them to the case bootloader over a serial
//! line, one acknowledged record at a time.
//!
//! # Architecture
//!
//! - **Protocol**: S-record codec, image header, handshake options, device
//!   response matching
//! - **CRC**: the bootloader's word-wise CRC-32 over data records
//! - **Payload**: compiled fragments and composite images
//! - **Transport**: line-oriented serial abstraction (serialport, mock)
//! - **State**: session state machine and its transition function
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: polling driver and configuration
//!
//! # Example
//!
//! ```no_run
//! use casedfu_core::payload::{FirmwareFragment, build_dual_image};
//! use casedfu_core::session::{DfuSession, SessionConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let slot_a = FirmwareFragment::load("app_a.srec")?;
//! let slot_b = FirmwareFragment::load("app_b.srec")?;
//! build_dual_image("CB", &slot_a, &slot_b)?.save("charger.srec")?;
//!
//! let config = SessionConfig {
//!     port: "/dev/ttyACM0".to_string(),
//!     ..Default::default()
//! };
//! let report = DfuSession::new(config).run_file("charger.srec")?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod crc32;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use crc32::{CrcError, crc32, crc32_records};
pub use events::{DfuEvent, DfuObserver, NullObserver, TracingObserver};
pub use payload::{
    CompositeImage, FirmwareFragment, ImageError, build_boot_image, build_dual_image,
};
pub use protocol::{DeviceResponse, DfuOptions, Record, RecordError, RecordKind, Slot};
pub use session::{DfuSession, SessionConfig, SessionReport};
pub use state::{DfuState, FailureReason, SessionOutcome};
pub use transport::{LineTransport, MockTransport, SerialTransport, TransportError};
