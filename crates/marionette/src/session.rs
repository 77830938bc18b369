//! Session controller and state machine.
//!
//! Owns the Idle / Recording / Playing state, the state lock, and the two
//! background threads. Lock order everywhere: state lock, then file lock,
//! then port lock; the state lock is never held across a hardware call.

use crate::config::{ActuatorConfig, AppConfig, CaptureConfig, HoldConfig};
use crate::errors::MarionetteError;
use crate::hold::HoldGuard;
use crate::logging::append_run_log;
use crate::player::{playback_loop, rotate_edit_group};
use crate::recorder::capture_loop;
use crate::rig::Rig;
use crate::trajectory::{EditBuffer, Frame, TrajectoryStore};
use crate::types::{HoldStrategy, SessionState};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Everything guarded by the state lock.
pub(crate) struct SharedState {
    pub session: SessionState,
    pub stop_requested: bool,
    pub frames: Vec<Frame>,
    pub editing: BTreeSet<String>,
    pub edits: EditBuffer,
    pub holds: BTreeMap<String, HoldGuard>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            session: SessionState::Idle,
            stop_requested: false,
            frames: Vec::new(),
            editing: BTreeSet::new(),
            edits: EditBuffer::new(),
            holds: BTreeMap::new(),
        }
    }
}

/// Shared between the controller and the background loops for the lifetime of
/// the controller; one session at a time borrows it.
pub(crate) struct SessionContext {
    pub shared: Mutex<SharedState>,
    pub rig: Arc<Rig>,
    pub store: TrajectoryStore,
    pub actuators: Vec<ActuatorConfig>,
    pub capture: CaptureConfig,
    pub hold: HoldConfig,
}

impl SessionContext {
    pub(crate) fn from_config(config: &AppConfig, rig: Arc<Rig>) -> Self {
        Self {
            shared: Mutex::new(SharedState::new()),
            rig,
            store: TrajectoryStore::new(&config.trajectory.path),
            actuators: config.actuators.clone(),
            capture: config.capture.clone(),
            hold: config.hold,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().expect("state lock")
    }

    pub(crate) fn tracked_ids(&self) -> Vec<String> {
        self.actuators.iter().map(|a| a.id.clone()).collect()
    }

    pub(crate) fn strategy_of(&self, id: &str) -> Result<HoldStrategy, MarionetteError> {
        self.actuators
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.hold)
            .ok_or_else(|| MarionetteError::InvalidState(format!("unknown actuator {id}")))
    }
}

/// Take every hold guard out of the shared state; callers release them after
/// the state lock is back down.
pub(crate) fn take_holds(ctx: &SessionContext) -> Vec<HoldGuard> {
    let mut shared = ctx.lock();
    let holds = std::mem::take(&mut shared.holds);
    holds.into_values().collect()
}

/// Release guards one by one, keeping the first failure but attempting all.
pub(crate) fn release_holds(holds: Vec<HoldGuard>) -> Result<(), MarionetteError> {
    let mut first_error = None;
    for guard in holds {
        let id = guard.id().to_string();
        if let Err(error) = guard.release() {
            append_run_log(
                "error",
                "hold.restore_failed",
                json!({ "actuator": id, "error": error.to_string() }),
            );
            first_error.get_or_insert(error);
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session: SessionState,
    pub frame_count: usize,
    pub editing: BTreeSet<String>,
}

pub struct SessionController {
    ctx: Arc<SessionContext>,
    worker: Mutex<Option<JoinHandle<Result<(), MarionetteError>>>>,
}

impl SessionController {
    pub fn new(config: &AppConfig, rig: Arc<Rig>) -> Self {
        Self {
            ctx: Arc::new(SessionContext::from_config(config, rig)),
            worker: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        let shared = self.ctx.lock();
        SessionStatus {
            session: shared.session,
            frame_count: shared.frames.len(),
            editing: shared.editing.clone(),
        }
    }

    /// Begin a capture session. Drives every actuator to its neutral pose,
    /// engages the per-actuator hold, then samples on a background thread
    /// until `stop()` or the configured time limit.
    pub fn start_recording(&self) -> Result<(), MarionetteError> {
        {
            let mut shared = self.ctx.lock();
            if shared.session != SessionState::Idle {
                return Err(MarionetteError::Busy(shared.session));
            }
            shared.session = SessionState::Recording;
            shared.stop_requested = false;
            shared.frames.clear();
            shared.editing.clear();
            shared.edits.clear();
        }

        if let Err(error) = self.prepare_capture() {
            let engaged = take_holds(&self.ctx);
            let _ = release_holds(engaged);
            self.ctx.lock().session = SessionState::Idle;
            append_run_log(
                "error",
                "record.start_failed",
                json!({ "error": error.to_string() }),
            );
            return Err(error);
        }

        self.spawn_worker("marionette-recorder", capture_loop)?;
        append_run_log(
            "info",
            "record.started",
            json!({ "actuators": self.ctx.tracked_ids() }),
        );
        Ok(())
    }

    /// Begin replaying the stored trajectory on a background thread. Loads
    /// the persisted form when no recording is resident.
    pub fn start_playback(&self) -> Result<(), MarionetteError> {
        {
            let mut shared = self.ctx.lock();
            if shared.session != SessionState::Idle {
                return Err(MarionetteError::Busy(shared.session));
            }
            if shared.frames.is_empty() {
                // State lock, then file lock: the documented order.
                shared.frames = self.ctx.store.load(&self.ctx.tracked_ids())?;
            }
            shared.session = SessionState::Playing;
            shared.stop_requested = false;
        }

        self.spawn_worker("marionette-player", playback_loop)?;
        append_run_log(
            "info",
            "play.started",
            json!({ "frames": self.ctx.lock().frames.len() }),
        );
        Ok(())
    }

    /// Idempotent. Signals the active loop, waits for it to exit, and
    /// surfaces the exit result (restore and persist failures included).
    /// Once this returns, no further hardware or trajectory mutation from
    /// the stopped session can occur.
    pub fn stop(&self) -> Result<(), MarionetteError> {
        let mut slot = self.worker.lock().expect("worker slot");
        let was_active = {
            let mut shared = self.ctx.lock();
            if shared.session == SessionState::Idle {
                false
            } else {
                shared.stop_requested = true;
                true
            }
        };
        let Some(handle) = slot.take() else {
            return Ok(());
        };
        let joined = handle
            .join()
            .map_err(|_| MarionetteError::Worker("session thread panicked".to_string()))?;
        if was_active {
            joined
        } else {
            // The session already auto-stopped; its outcome was logged by the
            // loop's own exit path.
            if let Err(error) = joined {
                append_run_log(
                    "warn",
                    "session.reaped_with_error",
                    json!({ "error": error.to_string() }),
                );
            }
            Ok(())
        }
    }

    /// Detach `ids` from playback for manual re-recording. Replaces any
    /// active group: the prior group's staged edits are merged and persisted
    /// first, never dropped. Actuators present in both groups keep their
    /// existing hold.
    pub fn start_edit_group(&self, ids: &[String]) -> Result<(), MarionetteError> {
        let next: BTreeSet<String> = ids.iter().cloned().collect();
        if next.is_empty() {
            return Err(MarionetteError::InvalidState(
                "edit group must name at least one actuator".to_string(),
            ));
        }
        for id in &next {
            self.ctx.strategy_of(id)?;
        }
        self.require_playing("start_edit_group")?;
        rotate_edit_group(&self.ctx, next)
    }

    /// Restore the editing actuators, merge the staged edits into the
    /// recording, persist, and drop the buffer.
    pub fn stop_edit_group(&self) -> Result<(), MarionetteError> {
        self.require_playing("stop_edit_group")?;
        rotate_edit_group(&self.ctx, BTreeSet::new())
    }

    fn require_playing(&self, operation: &str) -> Result<(), MarionetteError> {
        let shared = self.ctx.lock();
        if shared.session != SessionState::Playing {
            return Err(MarionetteError::InvalidState(format!(
                "{operation} requires playback, session is {}",
                shared.session
            )));
        }
        Ok(())
    }

    /// Neutral pose, then engage a hold per tracked actuator. Runs with the
    /// state lock down; the session slot is already reserved.
    fn prepare_capture(&self) -> Result<(), MarionetteError> {
        for actuator in &self.ctx.actuators {
            let blocking = actuator.hold == HoldStrategy::CurrentHold;
            self.ctx.rig.with_port(&actuator.id, |p| {
                p.move_to(actuator.neutral, Some(actuator.approach_velocity), blocking)
            })?;
        }
        for actuator in &self.ctx.actuators {
            let guard = HoldGuard::engage(
                Arc::clone(&self.ctx.rig),
                &actuator.id,
                actuator.hold,
                &self.ctx.hold,
            )?;
            self.ctx.lock().holds.insert(actuator.id.clone(), guard);
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        name: &str,
        body: fn(&SessionContext) -> Result<(), MarionetteError>,
    ) -> Result<(), MarionetteError> {
        let mut slot = self.worker.lock().expect("worker slot");
        // A previous session that auto-stopped leaves a finished handle; reap
        // it so its thread is joined before the next one starts.
        if let Some(stale) = slot.take() {
            if let Ok(Err(error)) = stale.join() {
                append_run_log(
                    "warn",
                    "session.reaped_with_error",
                    json!({ "error": error.to_string() }),
                );
            }
        }
        let ctx = Arc::clone(&self.ctx);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&ctx))
            .map_err(|e| {
                let engaged = take_holds(&self.ctx);
                let _ = release_holds(engaged);
                self.ctx.lock().session = SessionState::Idle;
                MarionetteError::Worker(e.to_string())
            })?;
        *slot = Some(handle);
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Termination-time obligation: restore and persist before the
        // controller goes away, whatever state the session is in.
        let _ = self.stop();
    }
}
