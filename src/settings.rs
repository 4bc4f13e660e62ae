// src/settings.rs
use serde::{Deserialize, Serialize};

use crate::storage::{ClientStorage, KEY_SETTINGS};

/// Creativity slider positions, least to most formal.
pub const CREATIVITY_LABELS: [&str; 5] = ["GenZ", "Creative", "Neutral", "Formal", "Corporate"];
/// Segmentation threshold positions.
pub const THRESHOLD_LABELS: [&str; 3] = ["Detailed", "Default", "Abstract"];

const DEFAULT_CREATIVITY: usize = 2; // "Neutral"
const DEFAULT_THRESHOLD: usize = 1; // "Default"

/// Generation preferences. Stored as slider indices; the backend receives
/// the labels. Indices outside the tables fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub creativity: usize,
    pub threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            creativity: DEFAULT_CREATIVITY,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Settings {
    pub fn load(storage: &ClientStorage) -> Self {
        storage.read(KEY_SETTINGS).unwrap_or_default()
    }

    pub fn save(&self, storage: &ClientStorage) {
        if let Err(e) = storage.write(KEY_SETTINGS, self) {
            tracing::warn!("Failed to persist settings: {}", e);
        }
    }

    pub fn creativity_label(&self) -> &'static str {
        CREATIVITY_LABELS
            .get(self.creativity)
            .copied()
            .unwrap_or(CREATIVITY_LABELS[DEFAULT_CREATIVITY])
    }

    pub fn threshold_label(&self) -> &'static str {
        THRESHOLD_LABELS
            .get(self.threshold)
            .copied()
            .unwrap_or(THRESHOLD_LABELS[DEFAULT_THRESHOLD])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let settings = Settings::default();
        assert_eq!(settings.creativity_label(), "Neutral");
        assert_eq!(settings.threshold_label(), "Default");
    }

    #[test]
    fn test_out_of_range_index_clamps_to_default() {
        let settings = Settings {
            creativity: 99,
            threshold: 7,
        };
        assert_eq!(settings.creativity_label(), "Neutral");
        assert_eq!(settings.threshold_label(), "Default");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();
        let settings = Settings {
            creativity: 4,
            threshold: 0,
        };
        settings.save(&storage);
        let loaded = Settings::load(&storage);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.creativity_label(), "Corporate");
        assert_eq!(loaded.threshold_label(), "Detailed");
    }
}
