//! State machine types for the DFU session.

use std::fmt;
use std::time::{Duration, Instant};

use crate::payload::CompositeImage;
use crate::protocol::{CRLF, DeviceResponse, DfuOptions, Record, Slot};

/// Slot a bare `Ready` is taken to come from.
pub const ASSUMED_ACTIVE_SLOT: Slot = Slot::B;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DfuState {
    /// Idle. Initial and terminal; `SessionContext::outcome` tells how a run
    /// ended.
    #[default]
    Off,
    /// Handshake about to be sent.
    Start,
    /// Handshake sent, waiting for the bootloader to report ready.
    WaitForReady,
    /// Current record about to be sent.
    SendRecord,
    /// Current record sent, waiting for ACK or NACK.
    WaitForAck,
    /// Terminator acknowledged, waiting for the device to finish.
    WaitForComplete,
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuState::Off => write!(f, "OFF"),
            DfuState::Start => write!(f, "START"),
            DfuState::WaitForReady => write!(f, "WAIT_FOR_READY"),
            DfuState::SendRecord => write!(f, "SEND_RECORD"),
            DfuState::WaitForAck => write!(f, "WAIT_FOR_ACK"),
            DfuState::WaitForComplete => write!(f, "WAIT_FOR_COMPLETE"),
        }
    }
}

impl DfuState {
    /// States that react to device output. The others only produce output
    /// and are stepped without reading the transport.
    pub fn awaits_input(&self) -> bool {
        matches!(
            self,
            DfuState::WaitForReady | DfuState::WaitForAck | DfuState::WaitForComplete
        )
    }
}

/// Why a session ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Device printed an error.
    DeviceError,
    /// Device printed its divider, i.e. left the bootloader.
    DeviceExited,
    /// The transport failed or was closed.
    Transport(String),
    /// Asked to send past the end of the transfer list.
    NoRecord(usize),
}

impl FailureReason {
    pub(crate) fn from_response(response: DeviceResponse) -> Option<Self> {
        match response {
            DeviceResponse::Error => Some(FailureReason::DeviceError),
            DeviceResponse::Divider => Some(FailureReason::DeviceExited),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DeviceError => write!(f, "device reported an error"),
            FailureReason::DeviceExited => write!(f, "device left the bootloader"),
            FailureReason::Transport(msg) => write!(f, "transport failure: {}", msg),
            FailureReason::NoRecord(index) => write!(f, "no record at index {}", index),
        }
    }
}

/// How a session reached `Off`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    Failed(FailureReason),
}

/// Mutable state of one session run.
///
/// Created at session start and dropped at its end; nothing in here is shared
/// between runs.
#[derive(Debug)]
pub struct SessionContext<'a> {
    /// Current state.
    pub state: DfuState,
    /// Index of the record in flight within `records`.
    pub index: usize,
    /// NACKs received.
    pub nack_count: u32,
    /// Resends after an ACK timeout.
    pub no_response_count: u32,
    /// Record transmissions, resends included.
    pub records_sent: u32,
    /// When the record in flight was sent.
    pub last_send: Option<Instant>,
    /// Slot the device reported running from.
    pub active_slot: Option<Slot>,
    /// Set when the session reaches `Off`.
    pub outcome: Option<SessionOutcome>,
    image: &'a CompositeImage,
    records: Vec<Record>,
    options: DfuOptions,
    ack_timeout: Duration,
}

impl<'a> SessionContext<'a> {
    pub fn new(image: &'a CompositeImage, options: DfuOptions, ack_timeout: Duration) -> Self {
        Self {
            state: DfuState::Off,
            index: 0,
            nack_count: 0,
            no_response_count: 0,
            records_sent: 0,
            last_send: None,
            active_slot: None,
            outcome: None,
            image,
            records: image.transfer_records(None),
            options,
            ack_timeout,
        }
    }

    /// Arm the session: `Off` to `Start`.
    pub fn begin(&mut self) {
        self.goto_state(DfuState::Start);
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: DfuState) {
        tracing::trace!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Go to `Off` as a failure.
    pub fn fail(&mut self, reason: FailureReason) {
        tracing::warn!(state = %self.state, index = self.index, %reason, "Session failed");
        self.outcome = Some(SessionOutcome::Failed(reason));
        self.goto_state(DfuState::Off);
    }

    /// Go to `Off` as a success.
    pub fn complete(&mut self) {
        self.outcome = Some(SessionOutcome::Success);
        self.goto_state(DfuState::Off);
    }

    /// Narrow the transfer list to what a device running from `active`
    /// needs and rewind to the first record.
    ///
    /// A device that does not say where it runs from is taken to be running
    /// from B, so slot A is sent. `active_slot` keeps what was reported.
    pub fn select_slot(&mut self, active: Option<Slot>) {
        self.active_slot = active;
        self.records = self
            .image
            .transfer_records(Some(active.unwrap_or(ASSUMED_ACTIVE_SLOT)));
        self.index = 0;
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn current_record(&self) -> Option<&Record> {
        self.records.get(self.index)
    }

    /// Wire bytes of the record in flight, CRLF included.
    pub fn current_line(&self) -> Option<Vec<u8>> {
        self.current_record()
            .map(|r| format!("{}{}", r.encode(), CRLF).into_bytes())
    }

    pub fn options(&self) -> DfuOptions {
        self.options
    }

    /// Whether the record in flight has been waiting longer than the ACK
    /// timeout. Always false with `disable_timeout`.
    pub fn ack_overdue(&self, now: Instant) -> bool {
        if self.options.disable_timeout {
            return false;
        }
        self.last_send
            .is_some_and(|sent| now.saturating_duration_since(sent) > self.ack_timeout)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Some(SessionOutcome::Success)
    }
}
