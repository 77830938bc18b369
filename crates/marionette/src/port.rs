//! Actuator transport capability.
//!
//! The register-level serial driver lives outside this crate; everything here
//! talks to one actuator through [`ActuatorPort`]. [`SimulatedActuator`] backs
//! the bench console and the tests.

use crate::errors::MarionetteError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Saved register state for one actuator, captured before a temporary mode
/// change and restored exactly once when the mode change ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorSettings {
    pub operating_mode: u8,
    pub position_p_gain: u16,
    pub goal_current: u16,
    pub goal_position: i32,
}

impl Default for MotorSettings {
    fn default() -> Self {
        // Stock position-control mode with full-strength gains.
        Self {
            operating_mode: 3,
            position_p_gain: 800,
            goal_current: 910,
            goal_position: 0,
        }
    }
}

/// One actuator on the serial bus. All calls are synchronous register
/// transactions; callers serialize bus access through the rig's port lock.
pub trait ActuatorPort: Send + Sync {
    fn read_position(&self) -> Result<i32, MarionetteError>;
    fn move_to(
        &self,
        position: i32,
        velocity: Option<f64>,
        blocking: bool,
    ) -> Result<(), MarionetteError>;
    fn enable_torque(&self) -> Result<(), MarionetteError>;
    fn disable_torque(&self) -> Result<(), MarionetteError>;
    fn set_operating_mode(&self, mode: u8) -> Result<(), MarionetteError>;
    fn set_position_gain(&self, gain: u16) -> Result<(), MarionetteError>;
    fn set_goal_current(&self, current: u16) -> Result<(), MarionetteError>;
    fn snapshot_settings(&self) -> Result<MotorSettings, MarionetteError>;
    fn restore_settings(&self, settings: &MotorSettings) -> Result<(), MarionetteError>;
}

// ── SimulatedActuator ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimState {
    position: i32,
    torque_on: bool,
    settings: MotorSettings,
    moves: Vec<i32>,
    torque_enables: u32,
    torque_disables: u32,
    snapshots: u32,
    restores: Vec<MotorSettings>,
    read_errors: Vec<String>,
}

/// In-memory actuator: goals settle instantly, register writes are recorded
/// so tests can assert on the exact hardware conversation.
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    state: Mutex<SimState>,
}

impl SimulatedActuator {
    pub fn new(position: i32) -> Self {
        let sim = Self::default();
        if let Ok(mut state) = sim.state.lock() {
            state.position = position;
        }
        sim
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, MarionetteError> {
        self.state
            .lock()
            .map_err(|_| MarionetteError::Transport("simulated actuator poisoned".to_string()))
    }

    /// Simulate the operator physically moving the joint.
    pub fn set_live_position(&self, position: i32) {
        if let Ok(mut state) = self.state.lock() {
            state.position = position;
        }
    }

    /// Queue a read failure for the next `read_position` call.
    pub fn push_read_error(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.read_errors.push(message.to_string());
        }
    }

    pub fn moves(&self) -> Vec<i32> {
        self.state.lock().map(|s| s.moves.clone()).unwrap_or_default()
    }

    pub fn torque_enables(&self) -> u32 {
        self.state.lock().map(|s| s.torque_enables).unwrap_or(0)
    }

    pub fn torque_disables(&self) -> u32 {
        self.state.lock().map(|s| s.torque_disables).unwrap_or(0)
    }

    pub fn snapshots_taken(&self) -> u32 {
        self.state.lock().map(|s| s.snapshots).unwrap_or(0)
    }

    pub fn restores(&self) -> Vec<MotorSettings> {
        self.state
            .lock()
            .map(|s| s.restores.clone())
            .unwrap_or_default()
    }

    pub fn settings(&self) -> MotorSettings {
        self.state
            .lock()
            .map(|s| s.settings)
            .unwrap_or_default()
    }
}

impl ActuatorPort for SimulatedActuator {
    fn read_position(&self) -> Result<i32, MarionetteError> {
        let mut state = self.lock()?;
        if !state.read_errors.is_empty() {
            let message = state.read_errors.remove(0);
            return Err(MarionetteError::Transport(message));
        }
        Ok(state.position)
    }

    fn move_to(
        &self,
        position: i32,
        _velocity: Option<f64>,
        _blocking: bool,
    ) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.settings.goal_position = position;
        state.moves.push(position);
        if state.torque_on {
            state.position = position;
        }
        Ok(())
    }

    fn enable_torque(&self) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.torque_on = true;
        state.torque_enables += 1;
        Ok(())
    }

    fn disable_torque(&self) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.torque_on = false;
        state.torque_disables += 1;
        Ok(())
    }

    fn set_operating_mode(&self, mode: u8) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.settings.operating_mode = mode;
        Ok(())
    }

    fn set_position_gain(&self, gain: u16) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.settings.position_p_gain = gain;
        Ok(())
    }

    fn set_goal_current(&self, current: u16) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.settings.goal_current = current;
        Ok(())
    }

    fn snapshot_settings(&self) -> Result<MotorSettings, MarionetteError> {
        let mut state = self.lock()?;
        state.snapshots += 1;
        Ok(state.settings)
    }

    fn restore_settings(&self, settings: &MotorSettings) -> Result<(), MarionetteError> {
        let mut state = self.lock()?;
        state.settings = *settings;
        state.restores.push(*settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_settle_only_with_torque_on() {
        let sim = SimulatedActuator::new(100);
        sim.move_to(500, None, false).expect("move");
        assert_eq!(sim.read_position().expect("read"), 100);

        sim.enable_torque().expect("torque");
        sim.move_to(500, None, false).expect("move");
        assert_eq!(sim.read_position().expect("read"), 500);
        assert_eq!(sim.moves(), vec![500, 500]);
    }

    #[test]
    fn snapshot_restore_round_trips_registers() {
        let sim = SimulatedActuator::new(0);
        let before = sim.snapshot_settings().expect("snapshot");

        sim.set_operating_mode(5).expect("mode");
        sim.set_position_gain(50).expect("gain");
        sim.set_goal_current(50).expect("current");
        assert_ne!(sim.settings(), before);

        sim.restore_settings(&before).expect("restore");
        assert_eq!(sim.settings(), before);
        assert_eq!(sim.restores(), vec![before]);
    }

    #[test]
    fn queued_read_error_surfaces_once() {
        let sim = SimulatedActuator::new(42);
        sim.push_read_error("checksum mismatch");
        assert!(sim.read_position().is_err());
        assert_eq!(sim.read_position().expect("recovered"), 42);
    }
}
