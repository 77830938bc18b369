//! Playback loop and edit overlay.
//!
//! The player replays the recording at the capture cadence and wraps back to
//! the start when it runs off the end — the rehearsal loop. Actuators in the
//! editing group are not commanded; their live positions are sampled into the
//! edit buffer instead, and merged back into the recording when the group
//! stops.

use crate::errors::MarionetteError;
use crate::hold::HoldGuard;
use crate::logging::append_run_log;
use crate::session::SessionContext;
use crate::trajectory::apply_edits;
use crate::types::SessionState;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) enum TickOutcome {
    /// Stop was requested or there is nothing to replay.
    Exit,
    /// A frame was acted on; `index` is the tick actually played after any
    /// wrap, so the caller continues from `index + 1`.
    Played { index: usize, wrapped: bool },
}

/// One replay tick. Copies the frame and group membership out under the state
/// lock, then talks to the hardware with the lock released; edit samples go
/// back in under the lock one write at a time.
pub(crate) fn playback_tick(ctx: &SessionContext, index: usize) -> TickOutcome {
    let (frame, editing, index, wrapped) = {
        let shared = ctx.lock();
        if shared.stop_requested || shared.frames.is_empty() {
            return TickOutcome::Exit;
        }
        let (index, wrapped) = if index >= shared.frames.len() {
            (0, true)
        } else {
            (index, false)
        };
        (
            shared.frames[index].clone(),
            shared.editing.clone(),
            index,
            wrapped,
        )
    };

    if wrapped {
        // Operator cue for the loop boundary; never blocks the cadence.
        ctx.rig.signal().ring();
        append_run_log("info", "play.wrapped", json!({}));
    }

    for actuator in &ctx.actuators {
        let id = &actuator.id;
        if editing.contains(id) {
            // Passive read: the hold engaged at group start keeps the joint
            // pushable, so this never writes a goal position.
            match ctx.rig.with_port(id, |p| p.read_position()) {
                Ok(position) => {
                    let mut shared = ctx.lock();
                    shared
                        .edits
                        .entry(index)
                        .or_default()
                        .insert(id.clone(), position);
                }
                Err(error) => append_run_log(
                    "warn",
                    "edit.read_skipped",
                    json!({ "actuator": id, "error": error.to_string() }),
                ),
            }
        } else if let Some(&goal) = frame.positions.get(id.as_str()) {
            // Exact stored position, no interpolation.
            if let Err(error) = ctx.rig.with_port(id, |p| p.move_to(goal, None, false)) {
                append_run_log(
                    "warn",
                    "play.move_skipped",
                    json!({ "actuator": id, "error": error.to_string() }),
                );
            }
        }
    }

    TickOutcome::Played { index, wrapped }
}

/// Body of the player thread.
pub(crate) fn playback_loop(ctx: &SessionContext) -> Result<(), MarionetteError> {
    let cadence = ctx.capture.cadence();
    let mut index = 0usize;

    loop {
        match playback_tick(ctx, index) {
            TickOutcome::Exit => break,
            TickOutcome::Played { index: played, .. } => index = played + 1,
        }
        std::thread::sleep(cadence);
    }

    finish_playback(ctx)
}

fn finish_playback(ctx: &SessionContext) -> Result<(), MarionetteError> {
    // An edit group still active when playback ends is stopped and merged,
    // never dropped.
    let editing_active = !ctx.lock().editing.is_empty();
    let result = if editing_active {
        rotate_edit_group(ctx, BTreeSet::new())
    } else {
        Ok(())
    };

    {
        let mut shared = ctx.lock();
        shared.session = SessionState::Idle;
        shared.stop_requested = false;
    }
    append_run_log("info", "play.stopped", json!({}));
    result
}

/// Swap the editing group to `next`, settling the outgoing group first:
/// restore the actuators leaving the group, merge and persist the staged
/// edits, then reconfigure the newcomers. Actuators present in both groups
/// keep their existing hold and are not re-snapshotted.
pub(crate) fn rotate_edit_group(
    ctx: &SessionContext,
    next: BTreeSet<String>,
) -> Result<(), MarionetteError> {
    let (buffer, had_prior, leaver_guards, newcomers) = {
        let mut shared = ctx.lock();
        let prev = std::mem::replace(&mut shared.editing, next.clone());
        let buffer = std::mem::take(&mut shared.edits);
        let had_prior = !prev.is_empty();
        let newcomers: Vec<String> = next.difference(&prev).cloned().collect();
        let mut leaver_guards = Vec::new();
        for id in prev.difference(&next) {
            if let Some(guard) = shared.holds.remove(id) {
                leaver_guards.push(guard);
            }
        }
        (buffer, had_prior, leaver_guards, newcomers)
    };

    let mut first_error: Option<MarionetteError> = None;

    // Restore the leavers before anything else touches their torque state.
    for guard in leaver_guards {
        let id = guard.id().to_string();
        if let Err(error) = guard.release() {
            append_run_log(
                "error",
                "edit.restore_failed",
                json!({ "actuator": id, "error": error.to_string() }),
            );
            first_error.get_or_insert(error);
        }
    }

    // Merge under the state lock, persist a consistent snapshot under the
    // file lock.
    if had_prior {
        let snapshot = {
            let mut shared = ctx.lock();
            apply_edits(&mut shared.frames, &buffer);
            shared.frames.clone()
        };
        append_run_log(
            "info",
            "edit.merged",
            json!({ "edited_ticks": buffer.len() }),
        );
        if let Err(error) = ctx.store.save(&snapshot) {
            append_run_log(
                "error",
                "edit.persist_failed",
                json!({ "error": error.to_string() }),
            );
            first_error.get_or_insert(error);
        }
    }

    // Reconfigure only the newcomers. Membership was already published, so
    // the player has stopped commanding them; until the hold lands the loop
    // just samples a still-powered joint, which is harmless.
    let mut engage_failed = false;
    for id in &newcomers {
        let strategy = match ctx.strategy_of(id) {
            Ok(strategy) => strategy,
            Err(error) => {
                engage_failed = true;
                first_error.get_or_insert(error);
                continue;
            }
        };
        match HoldGuard::engage(Arc::clone(&ctx.rig), id, strategy, &ctx.hold) {
            Ok(guard) => {
                ctx.lock().holds.insert(id.clone(), guard);
            }
            Err(error) => {
                append_run_log(
                    "error",
                    "edit.engage_failed",
                    json!({ "actuator": id, "error": error.to_string() }),
                );
                engage_failed = true;
                first_error.get_or_insert(error);
            }
        }
    }
    if engage_failed && !next.is_empty() {
        // A half-configured group is worse than none: back out to an empty
        // group, restoring whatever did engage.
        let _ = rotate_edit_group(ctx, BTreeSet::new());
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
