//! Capture loop: sample every tracked actuator at fixed cadence and append
//! frames to the recording.

use crate::errors::MarionetteError;
use crate::logging::append_run_log;
use crate::rig::Rig;
use crate::session::{release_holds, take_holds, SessionContext};
use crate::trajectory::Frame;
use crate::types::SessionState;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;

/// One sample across the rig. Each read is its own bus transaction under the
/// port lock; the frame is assembled only after every read has released it.
/// Any failed read skips the whole tick — frames are never partial.
pub(crate) fn capture_tick(
    rig: &Rig,
    ids: &[String],
    epoch: Instant,
) -> Result<Frame, MarionetteError> {
    let mut positions = BTreeMap::new();
    for id in ids {
        let position = rig.with_port(id, |p| p.read_position())?;
        positions.insert(id.clone(), position);
    }
    Ok(Frame {
        timestamp: epoch.elapsed().as_secs_f64(),
        positions,
    })
}

/// Body of the recorder thread. Runs until the stop flag is raised or the
/// session time limit is hit, then restores every hold, persists the
/// recording, and flips the session back to Idle — the one exit path shared
/// by manual stop and the time-limit auto-stop.
pub(crate) fn capture_loop(ctx: &SessionContext) -> Result<(), MarionetteError> {
    let epoch = Instant::now();
    let ids = ctx.tracked_ids();
    let cadence = ctx.capture.cadence();
    let max_record = ctx.capture.max_record();

    loop {
        if ctx.lock().stop_requested {
            break;
        }
        if epoch.elapsed() >= max_record {
            append_run_log(
                "info",
                "record.time_limit",
                json!({ "max_record_secs": ctx.capture.max_record_secs }),
            );
            break;
        }

        match capture_tick(&ctx.rig, &ids, epoch) {
            Ok(frame) => ctx.lock().frames.push(frame),
            Err(error) => append_run_log(
                "warn",
                "record.tick_skipped",
                json!({ "error": error.to_string() }),
            ),
        }

        std::thread::sleep(cadence);
    }

    finish_capture(ctx)
}

fn finish_capture(ctx: &SessionContext) -> Result<(), MarionetteError> {
    // Restore first: a later persist failure must not leave an actuator in
    // its capture configuration.
    let holds = take_holds(ctx);
    let restore_result = release_holds(holds);

    let frames = ctx.lock().frames.clone();
    let persist_result = ctx.store.save(&frames);
    if let Err(error) = &persist_result {
        append_run_log(
            "error",
            "record.persist_failed",
            json!({ "error": error.to_string() }),
        );
    }

    {
        let mut shared = ctx.lock();
        shared.session = SessionState::Idle;
        shared.stop_requested = false;
    }
    append_run_log(
        "info",
        "record.stopped",
        json!({ "frames": frames.len(), "persisted": persist_result.is_ok() }),
    );

    restore_result.and(persist_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ActuatorPort, SimulatedActuator};
    use crate::rig::CountingSignal;
    use std::sync::Arc;

    fn two_motor_rig() -> (Rig, Arc<SimulatedActuator>, Arc<SimulatedActuator>) {
        let rig = Rig::new(Arc::new(CountingSignal::default()));
        let a = Arc::new(SimulatedActuator::new(100));
        let b = Arc::new(SimulatedActuator::new(200));
        rig.register("10", Arc::clone(&a) as Arc<dyn ActuatorPort>);
        rig.register("11", Arc::clone(&b) as Arc<dyn ActuatorPort>);
        (rig, a, b)
    }

    #[test]
    fn tick_samples_every_tracked_actuator() {
        let (rig, _a, _b) = two_motor_rig();
        let ids = vec!["10".to_string(), "11".to_string()];
        let frame = capture_tick(&rig, &ids, Instant::now()).expect("tick");
        assert_eq!(frame.positions["10"], 100);
        assert_eq!(frame.positions["11"], 200);
    }

    #[test]
    fn tick_with_a_failed_read_yields_no_frame() {
        let (rig, a, _b) = two_motor_rig();
        a.push_read_error("bus timeout");
        let ids = vec!["10".to_string(), "11".to_string()];
        assert!(capture_tick(&rig, &ids, Instant::now()).is_err());
        // Next tick recovers.
        assert!(capture_tick(&rig, &ids, Instant::now()).is_ok());
    }

    #[test]
    fn repeated_ticks_grow_a_complete_ordered_recording() {
        let (rig, a, _b) = two_motor_rig();
        let ids = vec!["10".to_string(), "11".to_string()];
        let epoch = Instant::now();

        let mut frames = Vec::new();
        for i in 0..100 {
            a.set_live_position(100 + i);
            frames.push(capture_tick(&rig, &ids, epoch).expect("tick"));
        }

        assert_eq!(frames.len(), 100);
        assert_eq!(frames[99].positions["10"], 199);
        for window in frames.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
            assert_eq!(window[0].positions.len(), 2);
        }
    }
}
