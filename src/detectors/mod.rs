//! Detector capability contract and registry.
//!
//! Detectors are plug-in analyzers with a uniform contract: given a file
//! set, produce findings. The loader chooses concrete implementations at
//! startup; the executors in [`executor`] never care which detector runs.

pub mod bundled;
pub mod executor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

use crate::core::errors::{OdavlError, Result};
use crate::core::findings::Finding;

/// Default per-detector-per-file wall-clock budget.
pub const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 300;

/// A resolved set of files to analyze: workspace root plus normalized
/// workspace-relative paths.
#[derive(Debug, Clone)]
pub struct FileSet {
    root: PathBuf,
    files: Vec<String>,
}

impl FileSet {
    /// Create a file set; paths are normalized to forward slashes.
    pub fn new(root: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files: files.into_iter().map(|f| f.replace('\\', "/")).collect(),
        }
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace-relative paths.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// A single-file subset sharing the same root.
    pub fn single(&self, file: &str) -> Self {
        Self {
            root: self.root.clone(),
            files: vec![file.to_string()],
        }
    }

    /// Read one file's content.
    pub async fn read(&self, file: &str) -> Result<String> {
        let path = self.root.join(file);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| OdavlError::io(format!("Failed to read {}", path.display()), e))
    }
}

/// Plug-in detector capability.
#[async_trait]
pub trait Detector: Send + Sync + std::fmt::Debug {
    /// Stable detector id.
    fn id(&self) -> &str;

    /// Detector version, surfaced in diagnostics.
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Per-file wall-clock budget.
    fn timeout(&self) -> Duration {
        Duration::from_secs(DEFAULT_DETECTOR_TIMEOUT_SECS)
    }

    /// Analyze the file set and return findings.
    async fn analyze(&self, files: &FileSet) -> Result<Vec<Finding>>;
}

/// Registry mapping detector ids to implementations.
#[derive(Default, Clone)]
pub struct DetectorRegistry {
    detectors: IndexMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled detectors installed.
    pub fn with_bundled() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(bundled::SecretScanDetector));
        registry.register(Arc::new(bundled::DebugLogDetector));
        registry.register(Arc::new(bundled::TodoTrackerDetector));
        registry
    }

    /// Register a detector under its id.
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.id().to_string(), detector);
    }

    /// All registered detectors, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Detector>> {
        self.detectors.values().cloned().collect()
    }

    /// All registered detector ids.
    pub fn ids(&self) -> Vec<String> {
        self.detectors.keys().cloned().collect()
    }

    /// Resolve a detector id list; unknown ids are a configuration error.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<Arc<dyn Detector>>> {
        ids.iter()
            .map(|id| {
                self.detectors.get(id).cloned().ok_or_else(|| {
                    OdavlError::config_field(format!("unknown detector '{id}'"), "detectors")
                })
            })
            .collect()
    }
}
