//! Detector executors: sequential and file-parallel.
//!
//! Both executors share the same contract: findings come back sorted by
//! `(file, line, detector, rule_id)` so downstream fingerprinting is
//! order-stable, and a detector that errors or times out is captured as an
//! informational finding instead of aborting the run.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::core::findings::{Finding, IssueCategory, Severity};

use super::{Detector, FileSet};

/// Rule id attached to findings that capture a detector failure.
pub const DETECTOR_ERROR_RULE: &str = "DETECTOR_ERROR";

/// How detectors are scheduled over the file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Detectors one-by-one over the whole set; deterministic, required in
    /// CI
    Sequential,
    /// Work grouped per file, files analyzed concurrently; within a file
    /// detectors still run sequentially
    FileParallel {
        /// Concurrent files per wave
        max_workers: usize,
    },
}

impl ExecutionMode {
    /// File-parallel mode with the default pool size `min(cpu/2, n_files)`.
    pub fn file_parallel_for(n_files: usize) -> Self {
        let half_cpus = std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1);
        Self::FileParallel {
            max_workers: half_cpus.min(n_files.max(1)),
        }
    }
}

/// Detector executor over a file set.
pub struct DetectorExecutor {
    mode: ExecutionMode,
}

impl DetectorExecutor {
    /// Executor with the given scheduling mode.
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    /// Run all detectors and return deterministically ordered findings.
    ///
    /// Never fails: detector errors surface as info findings.
    pub async fn run(&self, detectors: &[Arc<dyn Detector>], file_set: &FileSet) -> Vec<Finding> {
        let mut findings = match self.mode {
            ExecutionMode::Sequential => self.run_sequential(detectors, file_set).await,
            ExecutionMode::FileParallel { max_workers } => {
                self.run_file_parallel(detectors, file_set, max_workers).await
            }
        };

        findings.sort_by(|a, b| a.deterministic_cmp(b));
        debug!(findings = findings.len(), "detector execution complete");
        findings
    }

    async fn run_sequential(
        &self,
        detectors: &[Arc<dyn Detector>],
        file_set: &FileSet,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for detector in detectors {
            findings.extend(run_detector(detector, file_set, None).await);
        }
        findings
    }

    async fn run_file_parallel(
        &self,
        detectors: &[Arc<dyn Detector>],
        file_set: &FileSet,
        max_workers: usize,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let files = file_set.files().to_vec();

        for wave in files.chunks(max_workers.max(1)) {
            let futures = wave.iter().map(|file| {
                let single = file_set.single(file);
                let detectors = detectors.to_vec();
                let file = file.clone();
                async move {
                    let mut per_file = Vec::new();
                    // Detectors stay sequential within a file to avoid read
                    // contention amplification.
                    for detector in &detectors {
                        per_file.extend(run_detector(detector, &single, Some(&file)).await);
                    }
                    per_file
                }
            });

            for wave_findings in join_all(futures).await {
                findings.extend(wave_findings);
            }
        }

        findings
    }
}

/// Run one detector invocation with its timeout, capturing failures as
/// findings.
async fn run_detector(
    detector: &Arc<dyn Detector>,
    file_set: &FileSet,
    file_context: Option<&str>,
) -> Vec<Finding> {
    let budget = detector.timeout();
    let outcome = tokio::time::timeout(budget, detector.analyze(file_set)).await;

    match outcome {
        Ok(Ok(findings)) => findings,
        Ok(Err(error)) => {
            warn!(detector = detector.id(), %error, "detector failed; captured");
            vec![captured_failure(
                detector.id(),
                file_context,
                &format!("detector failed: {error}"),
            )]
        }
        Err(_) => {
            warn!(detector = detector.id(), "detector timed out; captured");
            vec![captured_failure(
                detector.id(),
                file_context,
                &format!("detector timed out after {}s", budget.as_secs()),
            )]
        }
    }
}

fn captured_failure(detector_id: &str, file: Option<&str>, message: &str) -> Finding {
    Finding::new(
        detector_id,
        Severity::Info,
        IssueCategory::Syntax,
        file.unwrap_or_default(),
        0,
        message,
    )
    .with_rule(DETECTOR_ERROR_RULE)
}
