//! Trajectory data model and persistence.
//!
//! The persisted form is one JSON document: an array of frames, each a map
//! from actuator id to position plus a `"t"` timestamp in seconds. Saves are
//! whole-file rewrites through a temp file, so a crash can lose the last save
//! but never leave mixed old/new content.

use crate::errors::MarionetteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One sampled instant across all tracked actuators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Monotonic seconds since the capture session started.
    #[serde(rename = "t")]
    pub timestamp: f64,
    #[serde(flatten)]
    pub positions: BTreeMap<String, i32>,
}

impl Frame {
    pub fn missing_key<'a>(&self, tracked: &'a [String]) -> Option<&'a str> {
        tracked
            .iter()
            .find(|id| !self.positions.contains_key(id.as_str()))
            .map(String::as_str)
    }
}

/// Staged live samples for an editing group: frame index → the positions
/// sampled for the actuators that were in the group at that tick.
pub type EditBuffer = BTreeMap<usize, BTreeMap<String, i32>>;

/// Overwrite the edited (index, actuator) pairs in place. Entries outside the
/// buffer and indices past the end of the recording are left untouched.
pub fn apply_edits(frames: &mut [Frame], edits: &EditBuffer) {
    for (index, partial) in edits {
        if let Some(frame) = frames.get_mut(*index) {
            for (id, position) in partial {
                frame.positions.insert(id.clone(), *position);
            }
        }
    }
}

/// Load/save of the persisted recording. The internal mutex is the file lock:
/// every read or write of the persisted form goes through it.
pub struct TrajectoryStore {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl TrajectoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, tracked: &[String]) -> Result<Vec<Frame>, MarionetteError> {
        let _guard = self
            .file_lock
            .lock()
            .map_err(|_| MarionetteError::Load("file lock poisoned".to_string()))?;
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| MarionetteError::Load(format!("{}: {e}", self.path.display())))?;
        let frames: Vec<Frame> = serde_json::from_str(&raw)
            .map_err(|e| MarionetteError::Load(format!("{}: {e}", self.path.display())))?;
        for (index, frame) in frames.iter().enumerate() {
            if let Some(missing) = frame.missing_key(tracked) {
                return Err(MarionetteError::Load(format!(
                    "frame {index} is missing actuator {missing}"
                )));
            }
        }
        Ok(frames)
    }

    pub fn save(&self, frames: &[Frame]) -> Result<(), MarionetteError> {
        let _guard = self
            .file_lock
            .lock()
            .map_err(|_| MarionetteError::Persist("file lock poisoned".to_string()))?;
        let rendered = serde_json::to_string_pretty(frames)
            .map_err(|e| MarionetteError::Persist(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MarionetteError::Persist(e.to_string()))?;
            }
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, rendered)
            .map_err(|e| MarionetteError::Persist(format!("{}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| MarionetteError::Persist(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: f64, pairs: &[(&str, i32)]) -> Frame {
        Frame {
            timestamp: t,
            positions: pairs
                .iter()
                .map(|(id, pos)| (id.to_string(), *pos))
                .collect(),
        }
    }

    fn tracked() -> Vec<String> {
        vec!["10".to_string(), "11".to_string()]
    }

    #[test]
    fn save_then_load_reproduces_the_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TrajectoryStore::new(dir.path().join("frames.json"));
        let frames = vec![
            frame(0.005, &[("10", 180), ("11", 102)]),
            frame(0.010, &[("10", 181), ("11", 99)]),
        ];

        store.save(&frames).expect("save");
        let loaded = store.load(&tracked()).expect("load");
        assert_eq!(loaded, frames);
    }

    #[test]
    fn wire_format_matches_flat_id_to_position_maps() {
        let f = frame(1.25, &[("10", 512)]);
        let rendered = serde_json::to_string(&f).expect("serialize");
        assert_eq!(rendered, "{\"t\":1.25,\"10\":512}");

        let parsed: Frame = serde_json::from_str("{\"10\": 512, \"t\": 1.25}").expect("parse");
        assert_eq!(parsed, f);
    }

    #[test]
    fn load_missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TrajectoryStore::new(dir.path().join("absent.json"));
        let err = store.load(&tracked()).expect_err("missing");
        assert!(matches!(err, MarionetteError::Load(_)));
    }

    #[test]
    fn load_malformed_json_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frames.json");
        std::fs::write(&path, "not json").expect("write");
        let err = TrajectoryStore::new(&path)
            .load(&tracked())
            .expect_err("malformed");
        assert!(matches!(err, MarionetteError::Load(_)));
    }

    #[test]
    fn load_rejects_frames_missing_a_tracked_actuator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frames.json");
        std::fs::write(&path, r#"[{"t": 0.0, "10": 1}]"#).expect("write");
        let err = TrajectoryStore::new(&path)
            .load(&tracked())
            .expect_err("partial frame");
        assert!(matches!(err, MarionetteError::Load(message)
            if message.contains("missing actuator 11")));
    }

    #[test]
    fn apply_edits_touches_only_the_edited_pairs() {
        let mut frames = vec![
            frame(0.0, &[("10", 1), ("11", 2)]),
            frame(0.1, &[("10", 3), ("11", 4)]),
            frame(0.2, &[("10", 5), ("11", 6)]),
        ];
        let before = frames.clone();

        let mut edits = EditBuffer::new();
        edits.insert(1, [("11".to_string(), 40)].into_iter().collect());
        apply_edits(&mut frames, &edits);

        assert_eq!(frames[0], before[0]);
        assert_eq!(frames[2], before[2]);
        assert_eq!(frames[1].positions["10"], 3);
        assert_eq!(frames[1].positions["11"], 40);
        assert_eq!(frames[1].timestamp, before[1].timestamp);
    }

    #[test]
    fn apply_edits_ignores_indices_past_the_end() {
        let mut frames = vec![frame(0.0, &[("10", 1), ("11", 2)])];
        let before = frames.clone();

        let mut edits = EditBuffer::new();
        edits.insert(9, [("10".to_string(), 99)].into_iter().collect());
        apply_edits(&mut frames, &edits);
        assert_eq!(frames, before);
    }
}
