//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use traits::{LineTransport, TransportError};
