//! State handlers - the session's single transition function.
//!
//! `transition` performs no I/O: it takes the classified device response
//! (if any) and the current time, updates the context and returns the bytes
//! the driver has to write.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::protocol::DeviceResponse;
use crate::state::machine::{ASSUMED_ACTIVE_SLOT, DfuState, FailureReason, SessionContext};

/// Advance the session by one step.
pub fn transition(
    ctx: &mut SessionContext<'_>,
    response: Option<DeviceResponse>,
    now: Instant,
) -> Vec<Vec<u8>> {
    if ctx.state == DfuState::Off {
        return Vec::new();
    }

    // Error and divider end the session whatever it was doing.
    if let Some(reason) = response.and_then(FailureReason::from_response) {
        ctx.fail(reason);
        return Vec::new();
    }

    match ctx.state {
        DfuState::Off => Vec::new(),
        DfuState::Start => handle_start(ctx),
        DfuState::WaitForReady => handle_wait_for_ready(ctx, response),
        DfuState::SendRecord => handle_send_record(ctx, now),
        DfuState::WaitForAck => handle_wait_for_ack(ctx, response, now),
        DfuState::WaitForComplete => handle_wait_for_complete(ctx, response),
    }
}

// ============================================================================
// Individual State Handlers
// ============================================================================

fn handle_start(ctx: &mut SessionContext<'_>) -> Vec<Vec<u8>> {
    let options = ctx.options();
    info!(options = %format!("0x{:02X}", options.bits()), "Sending DFU handshake");
    ctx.goto_state(DfuState::WaitForReady);
    vec![options.handshake()]
}

fn handle_wait_for_ready(
    ctx: &mut SessionContext<'_>,
    response: Option<DeviceResponse>,
) -> Vec<Vec<u8>> {
    if let Some(DeviceResponse::Ready { active }) = response {
        ctx.select_slot(active);
        match active {
            Some(slot) => info!(
                active = %slot,
                target = %slot.other(),
                records = ctx.records().len(),
                "Bootloader ready"
            ),
            None => warn!(
                assumed = %ASSUMED_ACTIVE_SLOT,
                records = ctx.records().len(),
                "Bootloader ready without reporting its slot"
            ),
        }
        ctx.goto_state(DfuState::SendRecord);
    }
    Vec::new()
}

fn handle_send_record(ctx: &mut SessionContext<'_>, now: Instant) -> Vec<Vec<u8>> {
    let Some(line) = ctx.current_line() else {
        // The terminator is always last and an ACK for it moves on to
        // WAIT_FOR_COMPLETE, so the index cannot run past the list.
        ctx.fail(FailureReason::NoRecord(ctx.index));
        return Vec::new();
    };
    debug!(index = ctx.index, total = ctx.records().len(), "Sending record");
    ctx.records_sent += 1;
    ctx.last_send = Some(now);
    ctx.goto_state(DfuState::WaitForAck);
    vec![line]
}

fn handle_wait_for_ack(
    ctx: &mut SessionContext<'_>,
    response: Option<DeviceResponse>,
    now: Instant,
) -> Vec<Vec<u8>> {
    match response {
        Some(DeviceResponse::Nack) => {
            ctx.nack_count += 1;
            warn!(index = ctx.index, nacks = ctx.nack_count, "NACK, resending record");
            ctx.goto_state(DfuState::SendRecord);
        }
        Some(DeviceResponse::Ack) => {
            if ctx.current_record().is_some_and(|r| r.is_terminator()) {
                info!("Terminator acknowledged, waiting for completion");
                ctx.goto_state(DfuState::WaitForComplete);
            } else {
                ctx.index += 1;
                ctx.goto_state(DfuState::SendRecord);
            }
        }
        _ => {
            if ctx.ack_overdue(now) {
                ctx.no_response_count += 1;
                warn!(
                    index = ctx.index,
                    no_response = ctx.no_response_count,
                    "No response, resending record"
                );
                ctx.goto_state(DfuState::SendRecord);
            }
        }
    }
    Vec::new()
}

fn handle_wait_for_complete(
    ctx: &mut SessionContext<'_>,
    response: Option<DeviceResponse>,
) -> Vec<Vec<u8>> {
    if response == Some(DeviceResponse::Complete) {
        info!("Device reported update complete");
        ctx.complete();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CompositeImage, FirmwareFragment, build_dual_image};
    use crate::protocol::{DfuOptions, Record, Slot};
    use crate::state::machine::SessionOutcome;
    use std::time::Duration;

    const ACK_TIMEOUT: Duration = Duration::from_secs(1);

    fn fragment(base: u32) -> FirmwareFragment {
        FirmwareFragment::new(vec![
            Record::data(base, vec![1, 2, 3, 4]).unwrap(),
            Record::data(base + 4, vec![5, 6, 7, 8]).unwrap(),
        ])
        .unwrap()
    }

    fn image() -> CompositeImage {
        build_dual_image("CB", &fragment(0x0800_2000), &fragment(0x0801_0000)).unwrap()
    }

    fn ready(active: Slot) -> Option<DeviceResponse> {
        Some(DeviceResponse::Ready {
            active: Some(active),
        })
    }

    /// Drive a context up to the first WAIT_FOR_ACK.
    fn start<'a>(image: &'a CompositeImage, options: DfuOptions, now: Instant) -> SessionContext<'a> {
        let mut ctx = SessionContext::new(image, options, ACK_TIMEOUT);
        ctx.begin();
        let out = transition(&mut ctx, None, now);
        assert_eq!(out, vec![options.handshake()]);
        assert_eq!(ctx.state, DfuState::WaitForReady);

        transition(&mut ctx, ready(Slot::A), now);
        assert_eq!(ctx.state, DfuState::SendRecord);
        let out = transition(&mut ctx, None, now);
        assert_eq!(out.len(), 1);
        assert_eq!(ctx.state, DfuState::WaitForAck);
        ctx
    }

    #[test]
    fn test_off_is_inert() {
        let image = image();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        let out = transition(&mut ctx, Some(DeviceResponse::Ack), Instant::now());
        assert!(out.is_empty());
        assert_eq!(ctx.state, DfuState::Off);
        assert!(ctx.outcome.is_none());
    }

    #[test]
    fn test_ready_slot_a_drops_slot_a() {
        let image = image();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, Instant::now());
        transition(&mut ctx, ready(Slot::A), Instant::now());

        let b = &image.sections()[1].records;
        let expected: Vec<Record> = std::iter::once(image.header().clone())
            .chain(b.iter().cloned())
            .chain(std::iter::once(image.terminator().clone()))
            .collect();
        assert_eq!(ctx.records(), expected.as_slice());
        assert_eq!(ctx.active_slot, Some(Slot::A));
        assert_eq!(ctx.index, 0);
    }

    #[test]
    fn test_ready_slot_b_drops_slot_b() {
        let image = image();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, Instant::now());
        transition(&mut ctx, ready(Slot::B), Instant::now());

        let a = &image.sections()[0].records;
        assert_eq!(ctx.records().len(), 4);
        assert_eq!(&ctx.records()[1..3], a.as_slice());
    }

    #[test]
    fn test_ready_without_slot_sends_slot_a() {
        let image = image();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, Instant::now());
        transition(
            &mut ctx,
            Some(DeviceResponse::Ready { active: None }),
            Instant::now(),
        );

        assert_eq!(ctx.state, DfuState::SendRecord);
        assert_eq!(ctx.active_slot, None);
        assert_eq!(ctx.records().len(), 4);
        assert_eq!(ctx.records(), image.transfer_records(Some(Slot::B)).as_slice());
        assert_eq!(&ctx.records()[1..3], image.sections()[0].records.as_slice());
    }

    #[test]
    fn test_wait_for_ready_ignores_other_lines() {
        let image = image();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, Instant::now());
        for response in [None, Some(DeviceResponse::Ack), Some(DeviceResponse::Complete)] {
            assert!(transition(&mut ctx, response, Instant::now()).is_empty());
            assert_eq!(ctx.state, DfuState::WaitForReady);
        }
    }

    #[test]
    fn test_send_record_emits_current_line() {
        let image = image();
        let now = Instant::now();
        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, now);
        transition(&mut ctx, ready(Slot::B), now);
        let out = transition(&mut ctx, None, now);
        let expected = format!("{}\r\n", image.header().encode()).into_bytes();
        assert_eq!(out, vec![expected]);
        assert_eq!(ctx.last_send, Some(now));
        assert_eq!(ctx.records_sent, 1);
    }

    #[test]
    fn test_nack_and_timeout_keep_index() {
        let image = image();
        let t0 = Instant::now();
        let mut ctx = start(&image, DfuOptions::default(), t0);
        assert_eq!(ctx.index, 0);

        transition(&mut ctx, Some(DeviceResponse::Nack), t0);
        assert_eq!(ctx.state, DfuState::SendRecord);
        assert_eq!(ctx.index, 0);
        assert_eq!(ctx.nack_count, 1);

        transition(&mut ctx, None, t0);
        assert_eq!(ctx.state, DfuState::WaitForAck);

        // Within the timeout nothing happens.
        transition(&mut ctx, None, t0 + Duration::from_millis(999));
        assert_eq!(ctx.state, DfuState::WaitForAck);

        transition(&mut ctx, None, t0 + Duration::from_millis(1001));
        assert_eq!(ctx.state, DfuState::SendRecord);
        assert_eq!(ctx.index, 0);
        assert_eq!(ctx.no_response_count, 1);

        transition(&mut ctx, None, t0);
        transition(&mut ctx, Some(DeviceResponse::Ack), t0);
        assert_eq!(ctx.index, 1);
        assert_eq!(ctx.state, DfuState::SendRecord);
    }

    #[test]
    fn test_unrelated_line_counts_as_silence() {
        let image = image();
        let t0 = Instant::now();
        let mut ctx = start(&image, DfuOptions::default(), t0);
        transition(&mut ctx, Some(DeviceResponse::Complete), t0 + Duration::from_secs(2));
        assert_eq!(ctx.state, DfuState::SendRecord);
        assert_eq!(ctx.no_response_count, 1);
        assert_eq!(ctx.index, 0);
    }

    #[test]
    fn test_disable_timeout() {
        let image = image();
        let t0 = Instant::now();
        let options = DfuOptions {
            disable_timeout: true,
            ..Default::default()
        };
        let mut ctx = start(&image, options, t0);
        transition(&mut ctx, None, t0 + Duration::from_secs(3600));
        assert_eq!(ctx.state, DfuState::WaitForAck);
        assert_eq!(ctx.no_response_count, 0);

        // NACKs still trigger a resend.
        transition(&mut ctx, Some(DeviceResponse::Nack), t0);
        assert_eq!(ctx.state, DfuState::SendRecord);
        assert_eq!(ctx.nack_count, 1);
    }

    #[test]
    fn test_terminator_ack_waits_for_complete() {
        let image = image();
        let t0 = Instant::now();
        let mut ctx = start(&image, DfuOptions::default(), t0);
        // Header, two slot B records, terminator.
        for _ in 0..3 {
            transition(&mut ctx, Some(DeviceResponse::Ack), t0);
            transition(&mut ctx, None, t0);
        }
        assert!(ctx.current_record().unwrap().is_terminator());
        transition(&mut ctx, Some(DeviceResponse::Ack), t0);
        assert_eq!(ctx.state, DfuState::WaitForComplete);
        assert_eq!(ctx.index, 3);

        transition(&mut ctx, Some(DeviceResponse::Ack), t0);
        assert_eq!(ctx.state, DfuState::WaitForComplete);

        transition(&mut ctx, Some(DeviceResponse::Complete), t0);
        assert_eq!(ctx.state, DfuState::Off);
        assert!(ctx.is_success());
    }

    #[test]
    fn test_fatal_responses() {
        let image = image();
        let t0 = Instant::now();

        let mut ctx = start(&image, DfuOptions::default(), t0);
        transition(&mut ctx, Some(DeviceResponse::Error), t0);
        assert_eq!(ctx.state, DfuState::Off);
        assert_eq!(
            ctx.outcome,
            Some(SessionOutcome::Failed(FailureReason::DeviceError))
        );

        let mut ctx = SessionContext::new(&image, DfuOptions::default(), ACK_TIMEOUT);
        ctx.begin();
        transition(&mut ctx, None, t0);
        transition(&mut ctx, Some(DeviceResponse::Divider), t0);
        assert_eq!(
            ctx.outcome,
            Some(SessionOutcome::Failed(FailureReason::DeviceExited))
        );
    }
}
