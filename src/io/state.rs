//! Workspace-local state directory layout and atomic write helpers.
//!
//! All persistent state lives under `.odavl/` in the workspace root:
//! baselines, the trust store, session reports, the policy audit log, and
//! the brain-history telemetry streams. Documents are written atomically
//! (temp file + rename); streams are appended one self-contained JSON line
//! at a time.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{OdavlError, Result};

/// Name of the workspace-local state directory.
pub const STATE_DIR_NAME: &str = ".odavl";

/// Resolved paths of the state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// State directory under a workspace root.
    pub fn for_workspace(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            root: workspace_root.as_ref().join(STATE_DIR_NAME),
        }
    }

    /// State directory at an explicit location.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the state directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Baseline documents directory.
    pub fn baselines_dir(&self) -> PathBuf {
        self.root.join("baselines")
    }

    /// Trust store document.
    pub fn trust_store_path(&self) -> PathBuf {
        self.root.join("recipes-trust.json")
    }

    /// Session report directory.
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports").join("autopilot")
    }

    /// Content-addressed session report path.
    pub fn report_path(&self, session_id: &str) -> PathBuf {
        self.reports_dir().join(format!("{session_id}.oms.json"))
    }

    /// Policy audit log.
    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join("audit").join("autoapproval.jsonl")
    }

    /// Telemetry stream for a product.
    pub fn telemetry_events_path(&self, product: &str) -> PathBuf {
        self.root
            .join("brain-history")
            .join("telemetry")
            .join(product)
            .join("events.jsonl")
    }

    /// Adaptive learning-rate state document.
    pub fn adaptive_state_path(&self) -> PathBuf {
        self.root.join("brain-history").join("adaptive").join("state.json")
    }

    /// Create the directory skeleton.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.baselines_dir(),
            self.reports_dir(),
            self.root.join("audit"),
            self.root.join("brain-history").join("adaptive"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                OdavlError::io(format!("Failed to create state directory: {}", dir.display()), e)
            })?;
        }
        Ok(())
    }
}

/// Write a JSON document atomically: serialize to a temp file in the target
/// directory, then rename over the destination.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            OdavlError::io(format!("Failed to create directory: {}", parent.display()), e)
        })?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .map_err(|e| OdavlError::io(format!("Failed to write {}", temp_path.display()), e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| OdavlError::io(format!("Failed to rename {}", path.display()), e))?;

    Ok(())
}

/// Append one value as a self-contained JSON line. Concurrent appenders are
/// safe at line granularity.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            OdavlError::io(format!("Failed to create directory: {}", parent.display()), e)
        })?;
    }

    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| OdavlError::io(format!("Failed to open {}", path.display()), e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| OdavlError::io(format!("Failed to append {}", path.display()), e))?;

    Ok(())
}
