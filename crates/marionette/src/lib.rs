pub mod config;
pub mod errors;
pub mod hold;
pub mod logging;
pub mod player;
pub mod port;
pub mod recorder;
pub mod rig;
pub mod session;
pub mod trajectory;
pub mod types;

use clap::Parser;
use config::{config_path_or_default, load_config, render_config, AppConfig, CliOverrides};
use errors::MarionetteError;
use logging::init_run_logger;
use port::{ActuatorPort, SimulatedActuator};
use rig::{ConsoleBell, Rig};
use session::SessionController;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
#[command(name = "marionette")]
#[command(about = "Gesture capture, live-edit, and playback for a multi-actuator performance robot")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub trajectory: Option<PathBuf>,
    #[arg(long)]
    pub cadence_ms: Option<u64>,
    #[arg(long)]
    pub max_record_secs: Option<u64>,
    #[arg(long)]
    pub run_log: Option<PathBuf>,
    /// Print the resolved configuration and exit.
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            trajectory_path: self.trajectory.clone(),
            cadence_ms: self.cadence_ms,
            max_record_secs: self.max_record_secs,
            run_log: self.run_log.clone(),
        }
    }
}

/// Build a rig of simulated actuators from the configuration. The production
/// register driver lives in the embedding process and is wired in through the
/// `ActuatorPort` capability; the shipped binary drives the bench rig so
/// gestures can be rehearsed without hardware.
pub fn build_simulated_rig(cfg: &AppConfig) -> Arc<Rig> {
    let rig = Rig::new(Arc::new(ConsoleBell));
    for actuator in &cfg.actuators {
        let sim = Arc::new(SimulatedActuator::new(actuator.neutral));
        let _ = sim.enable_torque();
        rig.register(&actuator.id, sim);
    }
    Arc::new(rig)
}

pub fn run() -> Result<i32, MarionetteError> {
    let cli = Cli::parse();
    let mut overrides = cli.overrides();

    if overrides.config_path.is_none() {
        let cwd = std::env::current_dir().map_err(|e| MarionetteError::Io(e.to_string()))?;
        let default_path = config_path_or_default(&overrides, &cwd);
        if default_path.exists() {
            overrides.config_path = Some(default_path);
        }
    }

    let cfg = load_config(&overrides)?;
    if let Some(path) = &cfg.logging.run_log {
        init_run_logger(path);
    }

    if cli.check_config {
        println!("{}", render_config(&cfg)?);
        return Ok(0);
    }

    let rig = build_simulated_rig(&cfg);
    let controller = Arc::new(SessionController::new(&cfg, rig));

    // Termination must still restore holds and persist the recording.
    let cleanup = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        let _ = cleanup.stop();
        std::process::exit(0);
    })
    .map_err(|e| MarionetteError::Worker(e.to_string()))?;

    println!(
        "marionette bench: {} actuators, trajectory {}",
        cfg.actuators.len(),
        cfg.trajectory.path.display()
    );
    println!("commands: record | play | stop | edit <id...> | edit-group <name> | stop-edit | status | quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| MarionetteError::Io(e.to_string()))?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let result = match command {
            "record" => controller.start_recording(),
            "play" => controller.start_playback(),
            "stop" => controller.stop(),
            "edit" => {
                let ids: Vec<String> = words.map(str::to_string).collect();
                controller.start_edit_group(&ids)
            }
            "edit-group" => match words.next().and_then(|name| cfg.groups.get(name)) {
                Some(members) => controller.start_edit_group(members),
                None => Err(MarionetteError::InvalidState(
                    "unknown actuator group".to_string(),
                )),
            },
            "stop-edit" => controller.stop_edit_group(),
            "status" => {
                let status = controller.status();
                println!(
                    "session={} frames={} editing={:?}",
                    status.session, status.frame_count, status.editing
                );
                continue;
            }
            "quit" => break,
            other => Err(MarionetteError::InvalidState(format!(
                "unknown command {other}"
            ))),
        };
        match result {
            Ok(()) => println!("ok"),
            Err(error) => println!("error: {error}"),
        }
    }

    controller.stop()?;
    Ok(0)
}
