//! DFU Session - drives one update over a line transport.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, trace, warn};

use crate::events::{DfuEvent, DfuObserver, TracingObserver};
use crate::payload::CompositeImage;
use crate::protocol::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_POLL_TIMEOUT_MS, DfuOptions,
    ResponseMatcher, Slot, TextMatcher,
};
use crate::state::{DfuState, FailureReason, SessionContext, SessionOutcome, transition};
use crate::transport::{LineTransport, SerialTransport};

/// Configuration for a DFU session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port the charger case is attached to.
    pub port: String,
    pub baud_rate: u32,
    /// Handshake options.
    pub options: DfuOptions,
    /// How long to wait for an ACK before resending a record.
    pub ack_timeout_ms: u64,
    /// Upper bound on a single transport read.
    pub poll_timeout_ms: u64,
    /// Only device lines containing this are considered.
    pub line_prefix: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            options: DfuOptions::default(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            line_prefix: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    fn matcher(&self) -> TextMatcher {
        match &self.line_prefix {
            Some(prefix) => TextMatcher::with_prefix(prefix.clone()),
            None => TextMatcher::new(),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub nack_count: u32,
    pub no_response_count: u32,
    /// Record transmissions, resends included.
    pub records_sent: u32,
    /// Length of the transfer list after slot selection.
    pub records_total: usize,
    pub active_slot: Option<Slot>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Success
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            SessionOutcome::Success => write!(f, "DFU complete")?,
            SessionOutcome::Failed(reason) => write!(f, "DFU failed: {}", reason)?,
        }
        write!(
            f,
            " (NACKs: {}, no response: {}, time taken: {:.1}s)",
            self.nack_count,
            self.no_response_count,
            self.elapsed.as_secs_f64()
        )
    }
}

/// What the driver remembers about the context before a transition, to tell
/// the observer what changed.
#[derive(Clone, Copy)]
struct Snapshot {
    state: DfuState,
    index: usize,
    nack_count: u32,
    no_response_count: u32,
}

impl Snapshot {
    fn of(ctx: &SessionContext<'_>) -> Self {
        Self {
            state: ctx.state,
            index: ctx.index,
            nack_count: ctx.nack_count,
            no_response_count: ctx.no_response_count,
        }
    }
}

/// DFU Session - runs the handshake and record transfer for one image.
pub struct DfuSession<O: DfuObserver, M: ResponseMatcher = TextMatcher> {
    config: SessionConfig,
    observer: Arc<O>,
    matcher: M,
}

impl DfuSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DfuObserver> DfuSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        let matcher = config.matcher();
        Self {
            config,
            observer,
            matcher,
        }
    }
}

impl<O: DfuObserver, M: ResponseMatcher> DfuSession<O, M> {
    /// Replace the line classifier, e.g. for a device with different output.
    pub fn with_matcher<N: ResponseMatcher>(self, matcher: N) -> DfuSession<O, N> {
        DfuSession {
            config: self.config,
            observer: self.observer,
            matcher,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load and check a dual image, open the configured serial port and run
    /// the session over it.
    pub fn run_file<P: AsRef<Path>>(&self, image_path: P) -> Result<SessionReport> {
        let image_path = image_path.as_ref();
        info!(path = %image_path.display(), "Loading image");
        let image = CompositeImage::load_dual(image_path)
            .with_context(|| format!("failed to load {}", image_path.display()))?;
        image.verify()?;

        let transport = SerialTransport::open(&self.config.port, self.config.baud_rate)?;
        Ok(self.run(transport, &image))
    }

    /// Run the complete DFU session.
    ///
    /// Takes the transport by value and drops it before returning, whatever
    /// the outcome.
    #[instrument(skip_all, fields(records = image.record_count()))]
    pub fn run<T: LineTransport>(&self, mut transport: T, image: &CompositeImage) -> SessionReport {
        let started = Instant::now();
        let poll_timeout = self.config.poll_timeout();
        let mut ctx = SessionContext::new(image, self.config.options, self.config.ack_timeout());
        let mut last_sent: Option<usize> = None;

        ctx.begin();
        self.observer.on_event(&DfuEvent::StateChanged {
            from: DfuState::Off,
            to: ctx.state,
        });

        let outcome = loop {
            if let Some(outcome) = &ctx.outcome {
                break outcome.clone();
            }

            // Start and SendRecord only produce output.
            let response = if ctx.state.awaits_input() {
                match transport.read_line(poll_timeout) {
                    Ok(Some(line)) => {
                        trace!(line = %line, "Device line");
                        let response = self.matcher.classify(&line);
                        self.observer.on_event(&DfuEvent::DeviceLine { line });
                        response
                    }
                    Ok(None) => None,
                    Err(e) => {
                        ctx.fail(FailureReason::Transport(e.to_string()));
                        continue;
                    }
                }
            } else {
                None
            };

            let before = Snapshot::of(&ctx);
            let output = transition(&mut ctx, response, Instant::now());

            let mut write_error = None;
            for bytes in &output {
                if let Err(e) = transport.write_all(bytes) {
                    write_error = Some(e);
                    break;
                }
            }
            if write_error.is_none() {
                self.emit_changes(&before, &ctx, !output.is_empty(), &mut last_sent);
            }
            if let Some(e) = write_error {
                ctx.fail(FailureReason::Transport(e.to_string()));
            }
        };

        drop(transport);

        match &outcome {
            SessionOutcome::Success => self.observer.on_event(&DfuEvent::Complete),
            SessionOutcome::Failed(reason) => self.observer.on_event(&DfuEvent::Failed {
                reason: reason.clone(),
            }),
        }

        let report = SessionReport {
            outcome,
            nack_count: ctx.nack_count,
            no_response_count: ctx.no_response_count,
            records_sent: ctx.records_sent,
            records_total: ctx.records().len(),
            active_slot: ctx.active_slot,
            elapsed: started.elapsed(),
        };
        if report.is_success() {
            info!(
                nacks = report.nack_count,
                no_response = report.no_response_count,
                records_sent = report.records_sent,
                "{}",
                report
            );
        } else {
            warn!(
                nacks = report.nack_count,
                no_response = report.no_response_count,
                records_sent = report.records_sent,
                "{}",
                report
            );
        }
        report
    }

    fn emit_changes(
        &self,
        before: &Snapshot,
        ctx: &SessionContext<'_>,
        wrote: bool,
        last_sent: &mut Option<usize>,
    ) {
        if wrote {
            match before.state {
                DfuState::Start => self.observer.on_event(&DfuEvent::HandshakeSent {
                    options: ctx.options().bits(),
                }),
                DfuState::SendRecord => {
                    let resend = *last_sent == Some(before.index);
                    *last_sent = Some(before.index);
                    self.observer.on_event(&DfuEvent::RecordSent {
                        index: before.index,
                        total: ctx.records().len(),
                        resend,
                    });
                }
                _ => {}
            }
        }

        if before.state == DfuState::WaitForReady && ctx.state == DfuState::SendRecord {
            self.observer.on_event(&DfuEvent::SlotDetected {
                active: ctx.active_slot,
                records: ctx.records().len(),
            });
        }
        if ctx.nack_count > before.nack_count {
            self.observer
                .on_event(&DfuEvent::Nack { index: before.index });
        }
        if ctx.no_response_count > before.no_response_count {
            self.observer
                .on_event(&DfuEvent::NoResponse { index: before.index });
        }
        if ctx.state != before.state {
            self.observer.on_event(&DfuEvent::StateChanged {
                from: before.state,
                to: ctx.state,
            });
        }
    }
}
