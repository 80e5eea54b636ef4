//! Handshake options.

use serde::{Deserialize, Serialize};

use super::constants::*;

/// Options folded into the `dfu <hex>` handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfuOptions {
    /// Never give up waiting for an ACK. Also disables the host-side resend
    /// timer.
    pub disable_timeout: bool,
    /// Device test aid: the bootloader answers with spurious NACKs.
    pub inject_nack: bool,
    /// Skip the bootloader's image compatibility check.
    pub override_compatibility: bool,
}

impl DfuOptions {
    /// Option bitmask; the begin bit is always set.
    pub fn bits(&self) -> u8 {
        let mut bits = OPT_BEGIN;
        if self.disable_timeout {
            bits |= OPT_DISABLE_TIMEOUT;
        }
        if self.inject_nack {
            bits |= OPT_INJECT_NACK;
        }
        if self.override_compatibility {
            bits |= OPT_OVERRIDE_COMPATIBILITY;
        }
        bits
    }

    /// Unknown bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            disable_timeout: bits & OPT_DISABLE_TIMEOUT != 0,
            inject_nack: bits & OPT_INJECT_NACK != 0,
            override_compatibility: bits & OPT_OVERRIDE_COMPATIBILITY != 0,
        }
    }

    /// Bytes of the handshake command.
    ///
    /// The leading CRLF terminates whatever partial line the device shell may
    /// be holding.
    pub fn handshake(&self) -> Vec<u8> {
        format!("{CRLF}{HANDSHAKE_COMMAND} {:x}{CRLF}", self.bits()).into_bytes()
    }
}
