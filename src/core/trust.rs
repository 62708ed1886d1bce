//! Per-recipe trust learned from session outcomes.
//!
//! Trust is a smoothed empirical success probability. Each completed session
//! contributes one observation batch per recipe; the smoothing rate is
//! adaptive, loaded from the brain-history state file when present. Records
//! persist in a single JSON store written atomically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::errors::{OdavlError, Result};

/// Lower clamp for trust values.
pub const TRUST_MIN: f64 = 0.1;

/// Upper clamp for trust values.
pub const TRUST_MAX: f64 = 1.0;

/// Trust assigned to a recipe on first sight.
pub const DEFAULT_TRUST: f64 = 0.5;

/// Smoothing rate used when no adaptive state file is present.
pub const DEFAULT_LEARNING_RATE: f64 = 0.3;

/// Reliability record for one recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Smoothed trust in [`TRUST_MIN`, `TRUST_MAX`]
    pub trust: f64,

    /// Lifetime successful observations
    pub success_count: u64,

    /// Lifetime failed observations
    pub failure_count: u64,

    /// Timestamp of the last update
    pub last_updated: DateTime<Utc>,
}

impl Default for TrustRecord {
    fn default() -> Self {
        Self {
            trust: DEFAULT_TRUST,
            success_count: 0,
            failure_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// How a recipe fared in one session, as judged by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustOutcome {
    /// Executed and verified clean
    Success,
    /// Failed or was rolled back
    Failure,
    /// Skipped; contributes nothing to counters
    Skipped,
}

/// Adaptive learning-rate state, maintained by the telemetry feedback loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveState {
    /// Current smoothing rate in (0, 1]
    pub learning_rate: f64,

    /// When the rate was last adapted
    pub updated_at: DateTime<Utc>,
}

impl AdaptiveState {
    /// Read the adaptive state file; absent files fall back to the default
    /// rate.
    pub fn load_or_default(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| Self::default()),
            Err(_) => Self::default(),
        }
    }
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            updated_at: Utc::now(),
        }
    }
}

/// On-disk shape of the trust store document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustDocument {
    recipes: HashMap<String, TrustRecord>,
}

/// Trust store backed by a single JSON document.
///
/// Process-wide state: initialized once at session start and injected into
/// the components that need it.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    records: RwLock<HashMap<String, TrustRecord>>,
    learning_rate: f64,
}

impl TrustStore {
    /// Open the store at `path`, seeding the smoothing rate from the
    /// adaptive state file when one exists.
    pub fn open(path: impl Into<PathBuf>, adaptive_state_path: &Path) -> Result<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => {
                let document: TrustDocument = serde_json::from_str(&content)?;
                document.recipes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(OdavlError::io(
                    format!("Failed to read trust store: {}", path.display()),
                    e,
                ))
            }
        };

        let adaptive = AdaptiveState::load_or_default(adaptive_state_path);
        debug!(
            recipes = records.len(),
            learning_rate = adaptive.learning_rate,
            "trust store opened"
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
            learning_rate: adaptive.learning_rate.clamp(0.01, 1.0),
        })
    }

    /// In-memory store for tests and dry runs.
    pub fn in_memory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: RwLock::new(HashMap::new()),
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }

    /// Smoothing rate in effect.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Current trust for a recipe; [`DEFAULT_TRUST`] on first sight.
    pub fn trust_for(&self, recipe_id: &str) -> f64 {
        self.records
            .read()
            .get(recipe_id)
            .map(|record| record.trust)
            .unwrap_or(DEFAULT_TRUST)
    }

    /// Lifetime failure count for a recipe.
    pub fn failure_count(&self, recipe_id: &str) -> u64 {
        self.records
            .read()
            .get(recipe_id)
            .map(|record| record.failure_count)
            .unwrap_or(0)
    }

    /// Snapshot of a recipe's record, if one exists.
    pub fn record(&self, recipe_id: &str) -> Option<TrustRecord> {
        self.records.read().get(recipe_id).cloned()
    }

    /// Apply one session's observations. Called exactly once per session,
    /// after completion.
    ///
    /// Skipped recipes contribute nothing. For each recipe with at least one
    /// success or failure, the instantaneous rate of this session's
    /// observations is smoothed into the stored trust and the lifetime
    /// counters are incremented (monotonically non-decreasing).
    pub fn apply_session(&self, outcomes: &[(String, TrustOutcome)]) {
        let mut per_recipe: HashMap<&str, (u64, u64)> = HashMap::new();
        for (recipe_id, outcome) in outcomes {
            let entry = per_recipe.entry(recipe_id.as_str()).or_insert((0, 0));
            match outcome {
                TrustOutcome::Success => entry.0 += 1,
                TrustOutcome::Failure => entry.1 += 1,
                TrustOutcome::Skipped => {}
            }
        }

        let now = Utc::now();
        let mut records = self.records.write();
        for (recipe_id, (successes, failures)) in per_recipe {
            if successes + failures == 0 {
                continue;
            }

            let record = records.entry(recipe_id.to_string()).or_default();
            let rate = successes as f64 / (successes + failures) as f64;
            record.trust = (record.trust * (1.0 - self.learning_rate)
                + rate * self.learning_rate)
                .clamp(TRUST_MIN, TRUST_MAX);
            record.success_count += successes;
            record.failure_count += failures;
            record.last_updated = now;

            debug!(
                recipe = recipe_id,
                trust = record.trust,
                successes,
                failures,
                "trust updated"
            );
        }
    }

    /// Persist the store atomically (write temp, rename).
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OdavlError::io(
                    format!("Failed to create trust store directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let document = TrustDocument {
            recipes: self.records.read().clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| {
            OdavlError::io(format!("Failed to write trust store: {}", temp_path.display()), e)
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            OdavlError::io(format!("Failed to rename trust store: {}", self.path.display()), e)
        })?;

        info!(path = %self.path.display(), "trust store persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store() -> TrustStore {
        TrustStore::in_memory("unused.json")
    }

    #[test]
    fn test_default_trust_on_first_sight() {
        let store = store();
        assert_eq!(store.trust_for("never-seen"), DEFAULT_TRUST);
        assert_eq!(store.failure_count("never-seen"), 0);
    }

    #[test]
    fn test_success_raises_trust() {
        let store = store();
        store.apply_session(&[("fix-security".into(), TrustOutcome::Success)]);

        // 0.5 * 0.7 + 1.0 * 0.3 = 0.65
        let record = store.record("fix-security").unwrap();
        assert!((record.trust - 0.65).abs() < 1e-9);
        assert_eq!(record.success_count, 1);
        assert_eq!(record.failure_count, 0);
    }

    #[test]
    fn test_failure_lowers_trust() {
        let store = store();
        store.apply_session(&[("fix-security".into(), TrustOutcome::Failure)]);

        // 0.5 * 0.7 + 0.0 * 0.3 = 0.35
        let record = store.record("fix-security").unwrap();
        assert!((record.trust - 0.35).abs() < 1e-9);
        assert_eq!(record.failure_count, 1);
    }

    #[test]
    fn test_trust_clamped_to_floor() {
        let store = store();
        for _ in 0..50 {
            store.apply_session(&[("bad-recipe".into(), TrustOutcome::Failure)]);
        }

        let record = store.record("bad-recipe").unwrap();
        assert!(record.trust >= TRUST_MIN);
        assert_eq!(record.failure_count, 50);
    }

    #[test]
    fn test_trust_clamped_to_ceiling() {
        let store = store();
        for _ in 0..50 {
            store.apply_session(&[("good-recipe".into(), TrustOutcome::Success)]);
        }

        let record = store.record("good-recipe").unwrap();
        assert!(record.trust <= TRUST_MAX);
    }

    #[test]
    fn test_skipped_does_not_touch_counters() {
        let store = store();
        store.apply_session(&[("fix-security".into(), TrustOutcome::Skipped)]);

        assert!(store.record("fix-security").is_none());
        assert_eq!(store.trust_for("fix-security"), DEFAULT_TRUST);
    }

    #[test]
    fn test_mixed_session_uses_instantaneous_rate() {
        let store = store();
        store.apply_session(&[
            ("recipe".into(), TrustOutcome::Success),
            ("recipe".into(), TrustOutcome::Failure),
        ]);

        // r = 0.5 -> trust unchanged at 0.5
        let record = store.record("recipe").unwrap();
        assert!((record.trust - 0.5).abs() < 1e-9);
        assert_eq!(record.success_count, 1);
        assert_eq!(record.failure_count, 1);
    }

    #[test]
    fn test_persist_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipes-trust.json");
        let adaptive = dir.path().join("adaptive-state.json");

        let store = TrustStore::open(&path, &adaptive).unwrap();
        store.apply_session(&[("fix-security".into(), TrustOutcome::Success)]);
        store.persist().unwrap();

        let reopened = TrustStore::open(&path, &adaptive).unwrap();
        let record = reopened.record("fix-security").unwrap();
        assert_eq!(record.success_count, 1);
        assert!((record.trust - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_learning_rate_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipes-trust.json");
        let adaptive = dir.path().join("adaptive-state.json");
        let state = AdaptiveState {
            learning_rate: 0.5,
            updated_at: Utc::now(),
        };
        fs::write(&adaptive, serde_json::to_string(&state).unwrap()).unwrap();

        let store = TrustStore::open(&path, &adaptive).unwrap();
        assert!((store.learning_rate() - 0.5).abs() < 1e-9);

        store.apply_session(&[("recipe".into(), TrustOutcome::Success)]);
        // 0.5 * 0.5 + 1.0 * 0.5 = 0.75
        let record = store.record("recipe").unwrap();
        assert!((record.trust - 0.75).abs() < 1e-9);
    }
}
