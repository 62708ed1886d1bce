//! Session telemetry streams.
//!
//! Every completed session appends one event to its product's JSON-lines
//! stream under `brain-history/telemetry/`. Readers consume the newest N
//! events; the trust feedback loop and nightly trend recording both feed
//! from here.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{OdavlError, Result};
use crate::io::state::append_jsonl;

/// Product a telemetry event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    /// Self-healing sessions
    Autopilot,
    /// Analysis runs
    Insight,
    /// Verification guardian
    Guardian,
}

impl Product {
    /// Directory name of the product's stream.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autopilot => "autopilot",
            Self::Insight => "insight",
            Self::Guardian => "guardian",
        }
    }
}

/// One session-level telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Session the event describes
    pub session_id: String,
    /// Product that emitted the event
    pub product: Product,
    /// Session outcome label
    pub outcome: String,
    /// Findings observed
    pub findings: usize,
    /// Recipes selected for execution
    pub recipes_selected: usize,
    /// Recipes that executed and survived verification
    pub recipes_executed: usize,
    /// Recipes that failed or were rolled back
    pub recipes_failed: usize,
    /// Session duration in milliseconds
    pub duration_ms: u64,
}

/// Append-only telemetry stream for one product.
#[derive(Debug, Clone)]
pub struct TelemetryStream {
    path: PathBuf,
}

impl TelemetryStream {
    /// Stream backed by the given events file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event, newest last.
    pub fn append(&self, event: &TelemetryEvent) -> Result<()> {
        append_jsonl(&self.path, event)?;
        debug!(session = %event.session_id, outcome = %event.outcome, "telemetry recorded");
        Ok(())
    }

    /// Read the last `n` events, newest last. Malformed lines are skipped.
    pub fn read_last(&self, n: usize) -> Result<Vec<TelemetryEvent>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(OdavlError::io(
                    format!("Failed to read telemetry stream: {}", self.path.display()),
                    e,
                ))
            }
        };

        let events: Vec<TelemetryEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let start = events.len().saturating_sub(n);
        Ok(events[start..].to_vec())
    }
}
