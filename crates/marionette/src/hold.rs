//! Capture-hold guard.
//!
//! Entering capture or edit mode reconfigures an actuator so the operator can
//! move it by hand. Engaging the guard takes on the obligation to restore the
//! actuator on every exit path; `release` discharges it exactly once and
//! `Drop` is the best-effort backstop for paths that never reach `release`.

use crate::config::HoldConfig;
use crate::errors::MarionetteError;
use crate::logging::append_run_log;
use crate::port::MotorSettings;
use crate::rig::Rig;
use crate::types::HoldStrategy;
use serde_json::json;
use std::sync::Arc;

pub struct HoldGuard {
    rig: Arc<Rig>,
    id: String,
    strategy: HoldStrategy,
    snapshot: Option<MotorSettings>,
    released: bool,
}

impl std::fmt::Debug for HoldGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldGuard")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("snapshot", &self.snapshot)
            .field("released", &self.released)
            .finish()
    }
}

impl HoldGuard {
    /// Reconfigure `id` for manual pushing. For `FreeSpin` the torque is
    /// dropped; for `CurrentHold` the current register state is snapshotted
    /// and the holding mode, soft gain, and current cap are written — all in
    /// one port-lock scope so the mode transition is never interleaved with
    /// another bus transaction.
    pub fn engage(
        rig: Arc<Rig>,
        id: &str,
        strategy: HoldStrategy,
        hold: &HoldConfig,
    ) -> Result<Self, MarionetteError> {
        let snapshot = match strategy {
            HoldStrategy::FreeSpin => {
                rig.with_port(id, |p| p.disable_torque())?;
                None
            }
            HoldStrategy::CurrentHold => {
                let snapshot = rig.with_port(id, |p| {
                    let snapshot = p.snapshot_settings()?;
                    p.set_operating_mode(hold.operating_mode)?;
                    p.set_position_gain(hold.position_p_gain)?;
                    p.set_goal_current(hold.goal_current)?;
                    Ok(snapshot)
                })?;
                Some(snapshot)
            }
        };
        append_run_log(
            "info",
            "hold.engaged",
            json!({ "actuator": id, "strategy": strategy.as_str() }),
        );
        Ok(Self {
            rig,
            id: id.to_string(),
            strategy,
            snapshot,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Restore the actuator and discharge the guard. Consumes the guard, so
    /// the restore cannot run twice.
    pub fn release(mut self) -> Result<(), MarionetteError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), MarionetteError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = match (self.strategy, self.snapshot.take()) {
            (HoldStrategy::FreeSpin, _) => self.rig.with_port(&self.id, |p| p.enable_torque()),
            (HoldStrategy::CurrentHold, Some(snapshot)) => self
                .rig
                .with_port(&self.id, |p| p.restore_settings(&snapshot)),
            // Snapshot can only be absent if engage never completed; nothing
            // to restore beyond torque.
            (HoldStrategy::CurrentHold, None) => {
                self.rig.with_port(&self.id, |p| p.enable_torque())
            }
        };
        append_run_log(
            "info",
            "hold.released",
            json!({ "actuator": self.id, "ok": result.is_ok() }),
        );
        result
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(error) = self.restore() {
                append_run_log(
                    "error",
                    "hold.drop_restore_failed",
                    json!({ "actuator": self.id, "error": error.to_string() }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ActuatorPort, SimulatedActuator};
    use crate::rig::CountingSignal;

    fn hold_config() -> HoldConfig {
        HoldConfig {
            operating_mode: 5,
            position_p_gain: 50,
            goal_current: 50,
        }
    }

    fn rig_with(id: &str, sim: Arc<SimulatedActuator>) -> Arc<Rig> {
        let rig = Rig::new(Arc::new(CountingSignal::default()));
        rig.register(id, sim);
        Arc::new(rig)
    }

    #[test]
    fn free_spin_drops_torque_and_release_restores_it() {
        let sim = Arc::new(SimulatedActuator::new(0));
        sim.enable_torque().expect("torque");
        let rig = rig_with("10", Arc::clone(&sim));

        let guard =
            HoldGuard::engage(rig, "10", HoldStrategy::FreeSpin, &hold_config()).expect("engage");
        assert_eq!(sim.torque_disables(), 1);

        guard.release().expect("release");
        assert_eq!(sim.torque_enables(), 2);
    }

    #[test]
    fn current_hold_snapshots_and_restores_exactly_once() {
        let sim = Arc::new(SimulatedActuator::new(199));
        let before = sim.settings();
        let rig = rig_with("13", Arc::clone(&sim));

        let guard = HoldGuard::engage(rig, "13", HoldStrategy::CurrentHold, &hold_config())
            .expect("engage");
        assert_eq!(sim.snapshots_taken(), 1);
        assert_eq!(sim.settings().operating_mode, 5);
        assert_eq!(sim.settings().position_p_gain, 50);

        guard.release().expect("release");
        assert_eq!(sim.restores(), vec![before]);
        assert_eq!(sim.settings(), before);
    }

    #[test]
    fn drop_without_release_still_restores() {
        let sim = Arc::new(SimulatedActuator::new(199));
        let rig = rig_with("13", Arc::clone(&sim));

        {
            let _guard = HoldGuard::engage(rig, "13", HoldStrategy::CurrentHold, &hold_config())
                .expect("engage");
        }
        assert_eq!(sim.restores().len(), 1);
    }

    #[test]
    fn engage_failure_propagates_transport_error() {
        let rig = Arc::new(Rig::new(Arc::new(CountingSignal::default())));
        let err = HoldGuard::engage(rig, "99", HoldStrategy::FreeSpin, &hold_config())
            .expect_err("unknown actuator");
        assert!(matches!(err, MarionetteError::Transport(_)));
    }
}
