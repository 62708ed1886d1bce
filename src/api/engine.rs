//! High-level engine interface: analyze and autopilot entry points.
//!
//! The engine wires the detector registry, baseline store, policy, trust,
//! and the session controller together over a workspace, and maps outcomes
//! onto the CLI exit-code contract.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::baseline::{
    compare_with_baseline, Baseline, BaselineComparison, BaselineStore,
};
use crate::core::config::{detect_ci, CiMode, OdavlConfig};
use crate::core::errors::{OdavlError, Result};
use crate::core::findings::Finding;
use crate::core::policy::{AuditLog, PolicyConfig, PolicyEngine};
use crate::core::session::{SessionController, SessionRunOutput};
use crate::core::trust::TrustStore;
use crate::detectors::executor::{DetectorExecutor, ExecutionMode, DETECTOR_ERROR_RULE};
use crate::detectors::{DetectorRegistry, FileSet};
use crate::io::state::StateDir;
use crate::io::telemetry::{Product, TelemetryEvent, TelemetryStream};

/// File extensions the bundled detectors understand.
const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "py", "rs", "go", "java", "json", "yml", "yaml", "toml",
];

/// Outcome of one analysis run.
#[derive(Debug)]
pub struct AnalyzeOutcome {
    /// Findings, deterministically ordered
    pub findings: Vec<Finding>,
    /// Delta against the stored baseline, when one was available
    pub comparison: Option<BaselineComparison>,
    /// True when a missing baseline was auto-created (PR mode)
    pub baseline_created: bool,
    /// Process exit code per the CLI contract
    pub exit_code: i32,
}

/// The odavl engine over one workspace.
pub struct OdavlEngine {
    workspace_root: PathBuf,
    config: OdavlConfig,
    state: StateDir,
    registry: DetectorRegistry,
}

impl OdavlEngine {
    /// Create an engine; the configuration is validated eagerly.
    pub fn new(workspace_root: impl Into<PathBuf>, config: OdavlConfig) -> Result<Self> {
        config.validate()?;
        let workspace_root = workspace_root.into();
        let state = match &config.state_dir {
            Some(dir) => StateDir::at(dir.clone()),
            None => StateDir::for_workspace(&workspace_root),
        };
        state.ensure()?;

        Ok(Self {
            workspace_root,
            config,
            state,
            registry: DetectorRegistry::with_bundled(),
        })
    }

    /// Workspace root this engine analyzes.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// State directory in use.
    pub fn state(&self) -> &StateDir {
        &self.state
    }

    /// Detector registry (extension point for external detectors).
    pub fn registry_mut(&mut self) -> &mut DetectorRegistry {
        &mut self.registry
    }

    /// Run detectors over the workspace and compare against the baseline.
    ///
    /// Exit codes: 0 no new critical, 1 detector error, 2 new critical in
    /// PR mode (config errors surface as `Err` and exit 3).
    pub async fn analyze(&self) -> Result<AnalyzeOutcome> {
        let started = std::time::Instant::now();
        let files = self.discover_files()?;
        info!(files = files.len(), "analysis started");

        let detectors = self.registry.resolve(&self.config.analysis.detectors)?;
        let ci = self.config.analysis.ci || detect_ci();
        let mode = if ci {
            // CI requires deterministic ordering.
            ExecutionMode::Sequential
        } else {
            ExecutionMode::file_parallel_for(files.len())
        };

        let file_set = FileSet::new(&self.workspace_root, files);
        let findings = DetectorExecutor::new(mode).run(&detectors, &file_set).await;

        let detector_errors = findings
            .iter()
            .filter(|f| f.rule_id.as_deref() == Some(DETECTOR_ERROR_RULE))
            .count();

        let ci_mode = self.config.analysis.ci_mode;
        let store = BaselineStore::new(self.state.baselines_dir());
        let baseline_name = self.config.analysis.baseline.clone();

        let mut baseline_created = false;
        let comparison = match store.load(&baseline_name) {
            Ok(baseline) => Some(compare_with_baseline(&findings, &baseline, &baseline_name)),
            Err(OdavlError::BaselineNotFound { .. }) if ci_mode == CiMode::Pr => {
                // First PR run: bootstrap the baseline and compare against
                // it, recording the auto-creation in its metadata.
                warn!(baseline = %baseline_name, "baseline missing; auto-creating");
                let baseline = Baseline::from_findings(
                    &findings,
                    self.config.analysis.detectors.clone(),
                    "odavl-analyze",
                )
                .mark_auto_created();
                store.save(&baseline_name, &baseline)?;
                baseline_created = true;
                Some(compare_with_baseline(&findings, &baseline, &baseline_name))
            }
            Err(OdavlError::BaselineNotFound { .. }) => {
                debug!(baseline = %baseline_name, "baseline missing; delta skipped");
                None
            }
            Err(other) => return Err(other),
        };

        let new_critical = comparison
            .as_ref()
            .map(BaselineComparison::new_critical_count)
            .unwrap_or(0);

        let exit_code = if ci_mode.fails_on_new_critical() && new_critical > 0 {
            2
        } else if detector_errors > 0 {
            1
        } else {
            0
        };

        let telemetry =
            TelemetryStream::new(self.state.telemetry_events_path(Product::Insight.as_str()));
        telemetry.append(&TelemetryEvent {
            timestamp: Utc::now(),
            session_id: format!("insight-{}", Uuid::new_v4()),
            product: Product::Insight,
            outcome: if exit_code == 0 { "clean" } else { "dirty" }.to_string(),
            findings: findings.len(),
            recipes_selected: 0,
            recipes_executed: 0,
            recipes_failed: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        })?;

        Ok(AnalyzeOutcome {
            findings,
            comparison,
            baseline_created,
            exit_code,
        })
    }

    /// Run one self-heal session over the workspace.
    pub async fn autopilot(&self) -> Result<SessionRunOutput> {
        let files = self.discover_files()?;
        let detectors = self.registry.resolve(&self.config.analysis.detectors)?;

        let policy_config = match &self.config.policy_path {
            Some(path) => PolicyConfig::from_yaml_file(path)?,
            None => PolicyConfig::default(),
        };

        let trust = Arc::new(TrustStore::open(
            self.state.trust_store_path(),
            &self.state.adaptive_state_path(),
        )?);

        let mut settings = self.config.autopilot.clone();
        if self.config.analysis.ci || detect_ci() {
            // Single worker keeps CI runs deterministic.
            settings.max_workers = 1;
        }

        let controller = SessionController::new(
            &self.workspace_root,
            settings,
            detectors,
            PolicyEngine::new(policy_config)?.with_audit(AuditLog::new(
                self.state.audit_log_path(),
                crate::core::config::session_id_from_env()
                    .unwrap_or_else(|| "pending".to_string()),
            )),
            trust,
            self.state.clone(),
        );

        controller
            .run(FileSet::new(&self.workspace_root, files))
            .await
    }

    /// Discover analyzable files under the workspace.
    ///
    /// Respects `.gitignore` through the walker, applies the configured
    /// ignore patterns, and restricts to source-like extensions. With
    /// `changed_only`, intersects with the git working-tree delta.
    pub fn discover_files(&self) -> Result<Vec<String>> {
        let ignore_set = build_glob_set(&self.config.analysis.ignore_patterns)?;
        let changed = if self.config.analysis.changed_only {
            self.changed_files()
        } else {
            None
        };

        let mut files = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.workspace_root).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "walk error; skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let rel = match entry.path().strip_prefix(&self.workspace_root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            let extension_ok = Path::new(&rel)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
            if !extension_ok || ignore_set.is_match(&rel) {
                continue;
            }
            if let Some(changed) = &changed {
                if !changed.contains(&rel) {
                    continue;
                }
            }

            files.push(rel);
        }

        files.sort();
        Ok(files)
    }

    /// Working-tree delta relative to HEAD; `None` outside a git repository.
    fn changed_files(&self) -> Option<Vec<String>> {
        let repo = match git2::Repository::discover(&self.workspace_root) {
            Ok(repo) => repo,
            Err(_) => {
                warn!("changed-only requested outside a git repository; analyzing all files");
                return None;
            }
        };

        let workdir = repo.workdir()?.to_path_buf();
        let mut options = git2::StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);

        let statuses = match repo.statuses(Some(&mut options)) {
            Ok(statuses) => statuses,
            Err(error) => {
                warn!(%error, "git status failed; analyzing all files");
                return None;
            }
        };

        let mut changed = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let absolute = workdir.join(path);
            if let Ok(rel) = absolute.strip_prefix(&self.workspace_root) {
                changed.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Some(changed)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            OdavlError::config_field(
                format!("invalid ignore pattern '{pattern}': {e}"),
                "analysis.ignore_patterns",
            )
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        OdavlError::config_field(format!("failed to build ignore set: {e}"), "analysis")
    })
}
