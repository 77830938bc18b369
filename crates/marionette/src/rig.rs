//! The actuator rig: every port on the shared serial bus, plus the port lock
//! that serializes bus transactions system-wide.

use crate::errors::MarionetteError;
use crate::port::ActuatorPort;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Non-blocking operator cue emitted when playback wraps to the start of the
/// recording.
pub trait WrapSignal: Send + Sync {
    fn ring(&self);
}

/// Terminal bell. The original rig plays a short sine "ting"; the audio
/// output device belongs to the front-end process, so the runtime's own cue
/// is the console bell.
pub struct ConsoleBell;

impl WrapSignal for ConsoleBell {
    fn ring(&self) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

#[derive(Default)]
pub struct CountingSignal {
    rings: AtomicU64,
}

impl CountingSignal {
    pub fn rings(&self) -> u64 {
        self.rings.load(Ordering::Relaxed)
    }
}

impl WrapSignal for CountingSignal {
    fn ring(&self) {
        self.rings.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Rig {
    // The bus mutex IS the port lock: holding it is the only way to reach a
    // port, so no two threads can address the transport concurrently.
    bus: Mutex<BTreeMap<String, Arc<dyn ActuatorPort>>>,
    signal: Arc<dyn WrapSignal>,
}

impl Rig {
    pub fn new(signal: Arc<dyn WrapSignal>) -> Self {
        Self {
            bus: Mutex::new(BTreeMap::new()),
            signal,
        }
    }

    pub fn register(&self, id: &str, port: Arc<dyn ActuatorPort>) {
        if let Ok(mut bus) = self.bus.lock() {
            bus.insert(id.to_string(), port);
        }
    }

    /// Run one bus transaction against a single actuator under the port lock.
    /// The lock is held for exactly the duration of the closure.
    pub fn with_port<T>(
        &self,
        id: &str,
        op: impl FnOnce(&dyn ActuatorPort) -> Result<T, MarionetteError>,
    ) -> Result<T, MarionetteError> {
        let bus = self
            .bus
            .lock()
            .map_err(|_| MarionetteError::Transport("port lock poisoned".to_string()))?;
        let port = bus
            .get(id)
            .ok_or_else(|| MarionetteError::Transport(format!("unknown actuator {id}")))?;
        op(port.as_ref())
    }

    pub fn ids(&self) -> Vec<String> {
        self.bus
            .lock()
            .map(|bus| bus.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn signal(&self) -> &dyn WrapSignal {
        self.signal.as_ref()
    }
}
