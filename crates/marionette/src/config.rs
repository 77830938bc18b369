use crate::errors::MarionetteError;
use crate::types::HoldStrategy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub trajectory_path: Option<PathBuf>,
    pub cadence_ms: Option<u64>,
    pub max_record_secs: Option<u64>,
    pub run_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub trajectory: TrajectoryConfig,
    pub hold: HoldConfig,
    pub actuators: Vec<ActuatorConfig>,
    pub groups: BTreeMap<String, Vec<String>>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sampling and replay interval in milliseconds.
    pub cadence_ms: u64,
    /// Hard cap on one capture session; reaching it auto-stops the recorder.
    pub max_record_secs: u64,
}

impl CaptureConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn max_record(&self) -> Duration {
        Duration::from_secs(self.max_record_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrajectoryConfig {
    pub path: PathBuf,
}

/// Register values applied to a `current_hold` actuator while it is being
/// recorded by hand: a soft position gain and a current cap so the joint
/// resists gravity but yields to the operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldConfig {
    pub operating_mode: u8,
    pub position_p_gain: u16,
    pub goal_current: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorConfig {
    /// Bus id, used as the key in frames and in the persisted trajectory.
    pub id: String,
    pub name: String,
    pub hold: HoldStrategy,
    /// Pose the actuator is driven to before capture starts.
    pub neutral: i32,
    /// Normalized approach velocity (0, 1] for the neutral move.
    pub approach_velocity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LoggingConfig {
    pub run_log: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let actuators = vec![
            actuator("10", "head_turn", HoldStrategy::FreeSpin, 180, 0.25),
            actuator("11", "head_tilt", HoldStrategy::FreeSpin, 102, 0.25),
            actuator("12", "mouth", HoldStrategy::FreeSpin, 330, 0.25),
            actuator("13", "neck_tilt", HoldStrategy::CurrentHold, 199, 0.01),
            actuator("14", "neck_turn", HoldStrategy::FreeSpin, 139, 0.01),
        ];
        let mut groups = BTreeMap::new();
        groups.insert(
            "head".to_string(),
            vec!["10".to_string(), "11".to_string(), "12".to_string()],
        );
        groups.insert(
            "neck".to_string(),
            vec!["13".to_string(), "14".to_string()],
        );
        Self {
            capture: CaptureConfig {
                cadence_ms: 5,
                max_record_secs: 600,
            },
            trajectory: TrajectoryConfig {
                path: PathBuf::from("recorded_frames.json"),
            },
            hold: HoldConfig {
                operating_mode: 5,
                position_p_gain: 50,
                goal_current: 50,
            },
            actuators,
            groups,
            logging: LoggingConfig::default(),
        }
    }
}

fn actuator(
    id: &str,
    name: &str,
    hold: HoldStrategy,
    neutral: i32,
    approach_velocity: f64,
) -> ActuatorConfig {
    ActuatorConfig {
        id: id.to_string(),
        name: name.to_string(),
        hold,
        neutral,
        approach_velocity,
    }
}

// ── Partial (TOML) layer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialAppConfig {
    pub capture: Option<PartialCaptureConfig>,
    pub trajectory: Option<PartialTrajectoryConfig>,
    pub hold: Option<PartialHoldConfig>,
    pub actuators: Option<Vec<ActuatorConfig>>,
    pub groups: Option<BTreeMap<String, Vec<String>>>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialCaptureConfig {
    pub cadence_ms: Option<u64>,
    pub max_record_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialTrajectoryConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialHoldConfig {
    pub operating_mode: Option<u8>,
    pub position_p_gain: Option<u16>,
    pub goal_current: Option<u16>,
}

pub fn load_config(overrides: &CliOverrides) -> Result<AppConfig, MarionetteError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| MarionetteError::Io(format!("{}: {e}", path.display())))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| MarionetteError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(capture) = partial.capture {
        if let Some(cadence_ms) = capture.cadence_ms {
            cfg.capture.cadence_ms = cadence_ms;
        }
        if let Some(max_record_secs) = capture.max_record_secs {
            cfg.capture.max_record_secs = max_record_secs;
        }
    }

    if let Some(trajectory) = partial.trajectory {
        if let Some(path) = trajectory.path {
            cfg.trajectory.path = path;
        }
    }

    if let Some(hold) = partial.hold {
        if let Some(operating_mode) = hold.operating_mode {
            cfg.hold.operating_mode = operating_mode;
        }
        if let Some(position_p_gain) = hold.position_p_gain {
            cfg.hold.position_p_gain = position_p_gain;
        }
        if let Some(goal_current) = hold.goal_current {
            cfg.hold.goal_current = goal_current;
        }
    }

    if let Some(actuators) = partial.actuators {
        cfg.actuators = actuators;
    }

    if let Some(groups) = partial.groups {
        cfg.groups = groups;
    }

    if let Some(logging) = partial.logging {
        cfg.logging = logging;
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.trajectory_path {
        cfg.trajectory.path = path.clone();
    }
    if let Some(cadence_ms) = overrides.cadence_ms {
        cfg.capture.cadence_ms = cadence_ms;
    }
    if let Some(max_record_secs) = overrides.max_record_secs {
        cfg.capture.max_record_secs = max_record_secs;
    }
    if let Some(run_log) = &overrides.run_log {
        cfg.logging.run_log = Some(run_log.clone());
    }
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), MarionetteError> {
    if cfg.capture.cadence_ms == 0 {
        return Err(MarionetteError::InvalidConfig(
            "capture.cadence_ms must be at least 1".to_string(),
        ));
    }
    if cfg.capture.max_record_secs == 0 {
        return Err(MarionetteError::InvalidConfig(
            "capture.max_record_secs must be at least 1".to_string(),
        ));
    }
    if cfg.actuators.is_empty() {
        return Err(MarionetteError::InvalidConfig(
            "at least one actuator must be configured".to_string(),
        ));
    }

    let mut ids: BTreeSet<&str> = BTreeSet::new();
    for actuator in &cfg.actuators {
        if actuator.id.is_empty() {
            return Err(MarionetteError::InvalidConfig(
                "actuator id must not be empty".to_string(),
            ));
        }
        if !ids.insert(actuator.id.as_str()) {
            return Err(MarionetteError::InvalidConfig(format!(
                "duplicate actuator id: {}",
                actuator.id
            )));
        }
        if !(actuator.approach_velocity > 0.0 && actuator.approach_velocity <= 1.0) {
            return Err(MarionetteError::InvalidConfig(format!(
                "actuator {}: approach_velocity must be in (0, 1]",
                actuator.id
            )));
        }
    }

    for (group, members) in &cfg.groups {
        if members.is_empty() {
            return Err(MarionetteError::InvalidConfig(format!(
                "group {group} has no members"
            )));
        }
        for member in members {
            if !ids.contains(member.as_str()) {
                return Err(MarionetteError::InvalidConfig(format!(
                    "group {group} references unknown actuator {member}"
                )));
            }
        }
    }

    Ok(())
}

impl AppConfig {
    /// Actuator ids in configuration order — the frame key set.
    pub fn tracked_ids(&self) -> Vec<String> {
        self.actuators.iter().map(|a| a.id.clone()).collect()
    }

    pub fn actuator(&self, id: &str) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| a.id == id)
    }
}

/// Write a TOML document for the current config, used by `--check-config`.
pub fn render_config(cfg: &AppConfig) -> Result<String, MarionetteError> {
    toml::to_string_pretty(cfg).map_err(|e| MarionetteError::ConfigParse(e.to_string()))
}

pub fn config_path_or_default(overrides: &CliOverrides, cwd: &Path) -> PathBuf {
    match &overrides.config_path {
        Some(path) => path.clone(),
        None => cwd.join("marionette.toml"),
    }
}
