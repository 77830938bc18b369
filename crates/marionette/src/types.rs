use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level session mode. Exactly one holds at any instant; Recording and
/// Playing are mutually exclusive and reached only from Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Playing,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Playing => "playing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an actuator is made pushable while the operator records it by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStrategy {
    /// Torque off entirely; the joint spins freely. Used for high-gear-ratio
    /// joints that hold their pose without power.
    FreeSpin,
    /// Switch to current-based position mode with a soft gain and a current
    /// cap, so a gravity-loaded joint resists sag but yields to a push.
    CurrentHold,
}

impl HoldStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FreeSpin => "free_spin",
            Self::CurrentHold => "current_hold",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_round_trips_lowercase() {
        let json = serde_json::to_string(&SessionState::Recording).expect("serialize");
        assert_eq!(json, "\"recording\"");
        let back: SessionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, SessionState::Recording);
    }

    #[test]
    fn hold_strategy_names_are_stable() {
        assert_eq!(HoldStrategy::FreeSpin.as_str(), "free_spin");
        assert_eq!(HoldStrategy::CurrentHold.as_str(), "current_hold");
    }
}
