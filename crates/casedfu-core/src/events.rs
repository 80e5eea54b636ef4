//! Event system for UI decoupling.
//!
//! Lets a front end follow a DFU session without reaching into the state
//! machine.

use crate::protocol::Slot;
use crate::state::{DfuState, FailureReason};

/// Events emitted by the DFU session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// State changed.
    StateChanged { from: DfuState, to: DfuState },
    /// Handshake written; `options` is the full option byte.
    HandshakeSent { options: u8 },
    /// Bootloader reported ready and the transfer list was narrowed.
    SlotDetected { active: Option<Slot>, records: usize },
    /// A record line was written.
    RecordSent {
        index: usize,
        total: usize,
        resend: bool,
    },
    /// Device rejected the record at `index`.
    Nack { index: usize },
    /// No answer for the record at `index` within the ACK timeout.
    NoResponse { index: usize },
    /// Raw line received from the device.
    DeviceLine { line: String },
    /// Device reported the update complete.
    Complete,
    /// Session ended without completing.
    Failed { reason: FailureReason },
}

/// Observer trait for receiving DFU events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            DfuEvent::HandshakeSent { options } => {
                tracing::debug!(options = %format!("0x{:02X}", options), "Handshake sent");
            }
            DfuEvent::SlotDetected { active, records } => match active {
                Some(slot) => tracing::info!(active = %slot, records, "Slot detected"),
                None => tracing::info!(records, "No slot reported"),
            },
            DfuEvent::RecordSent {
                index,
                total,
                resend,
            } => {
                let pct = if *total > 0 {
                    ((*index + 1) * 100) / *total
                } else {
                    0
                };
                tracing::debug!(
                    index,
                    total,
                    resend,
                    progress = %format!("{}%", pct),
                    "Record sent"
                );
            }
            DfuEvent::Nack { index } => {
                tracing::warn!(index, "NACK received");
            }
            DfuEvent::NoResponse { index } => {
                tracing::warn!(index, "No response");
            }
            DfuEvent::DeviceLine { line } => {
                tracing::trace!(line = %line, "Device");
            }
            DfuEvent::Complete => {
                tracing::info!("Update complete");
            }
            DfuEvent::Failed { reason } => {
                tracing::error!(reason = %reason, "Update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<DfuEvent>>);

    impl DfuObserver for Collect {
        fn on_event(&self, event: &DfuEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_observers_accept_every_event() {
        let events = vec![
            DfuEvent::StateChanged {
                from: DfuState::Off,
                to: DfuState::Start,
            },
            DfuEvent::HandshakeSent { options: 0x1D },
            DfuEvent::SlotDetected {
                active: Some(Slot::B),
                records: 3,
            },
            DfuEvent::SlotDetected {
                active: None,
                records: 5,
            },
            DfuEvent::RecordSent {
                index: 0,
                total: 0,
                resend: false,
            },
            DfuEvent::Nack { index: 1 },
            DfuEvent::NoResponse { index: 1 },
            DfuEvent::DeviceLine {
                line: "DFU: ACK".to_string(),
            },
            DfuEvent::Complete,
            DfuEvent::Failed {
                reason: FailureReason::DeviceExited,
            },
        ];

        let collect = Collect(Mutex::new(Vec::new()));
        for event in &events {
            NullObserver.on_event(event);
            TracingObserver.on_event(event);
            collect.on_event(event);
        }
        assert_eq!(*collect.0.lock().unwrap(), events);
    }
}
