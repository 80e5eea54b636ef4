//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::transition;
pub use machine::{ASSUMED_ACTIVE_SLOT, DfuState, FailureReason, SessionContext, SessionOutcome};
