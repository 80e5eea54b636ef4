//! Device response classification.
//!
//! The bootloader does not frame its replies; it prints log lines and the host
//! looks for marker substrings in them. All of that matching lives here so the
//! state machine only ever sees a `DeviceResponse`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::*;

/// Application slot on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(&self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::A => write!(f, "A"),
            Slot::B => write!(f, "B"),
        }
    }
}

/// A device line the session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResponse {
    /// Bootloader accepted the handshake. `active` is the slot it is running from.
    Ready { active: Option<Slot> },
    Ack,
    Nack,
    Complete,
    Error,
    /// Dashed divider the device prints when it drops back to its shell.
    Divider,
}

impl DeviceResponse {
    /// Responses that end the session as a failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceResponse::Error | DeviceResponse::Divider)
    }
}

impl fmt::Display for DeviceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceResponse::Ready { active: Some(slot) } => write!(f, "Ready ({})", slot),
            DeviceResponse::Ready { active: None } => write!(f, "Ready"),
            DeviceResponse::Ack => write!(f, "ACK"),
            DeviceResponse::Nack => write!(f, "NACK"),
            DeviceResponse::Complete => write!(f, "Complete"),
            DeviceResponse::Error => write!(f, "Error"),
            DeviceResponse::Divider => write!(f, "Divider"),
        }
    }
}

/// Turns a raw device line into a response, or `None` when the line means
/// nothing to the session.
pub trait ResponseMatcher {
    fn classify(&self, line: &str) -> Option<DeviceResponse>;
}

/// Substring matcher for the charger case bootloader's log output.
///
/// Precedence: Error, divider, Complete, NACK, ACK, Ready. `NACK` has to be
/// tested before `ACK` since it contains it, and a completion line wins over
/// any acknowledgement printed with it.
#[derive(Debug, Clone, Default)]
pub struct TextMatcher {
    prefix: Option<String>,
}

impl TextMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore every line that does not contain `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl ResponseMatcher for TextMatcher {
    fn classify(&self, line: &str) -> Option<DeviceResponse> {
        if let Some(prefix) = &self.prefix
            && !line.contains(prefix.as_str())
        {
            return None;
        }

        if line.contains(RESP_ERROR) {
            Some(DeviceResponse::Error)
        } else if line.contains(RESP_DIVIDER) {
            Some(DeviceResponse::Divider)
        } else if line.contains(RESP_COMPLETE) {
            Some(DeviceResponse::Complete)
        } else if line.contains(RESP_NACK) {
            Some(DeviceResponse::Nack)
        } else if line.contains(RESP_ACK) {
            Some(DeviceResponse::Ack)
        } else if line.contains(RESP_READY) {
            let active = if line.contains(RESP_SLOT_A) {
                Some(Slot::A)
            } else if line.contains(RESP_SLOT_B) {
                Some(Slot::B)
            } else {
                None
            };
            Some(DeviceResponse::Ready { active })
        } else {
            None
        }
    }
}
