//! Baseline persistence and delta computation.
//!
//! A baseline is a persisted snapshot of issues considered "known" at a
//! reference commit. Comparing a fresh analysis run against it classifies
//! every finding as new, unchanged, or resolved — the delta-first contract
//! that lets CI fail on newly introduced issues instead of absolute counts.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::core::errors::{OdavlError, Result};
use crate::core::findings::{Finding, Severity};
use crate::core::fingerprint::generate_fingerprint;

/// Current baseline schema version. Readers reject documents whose major
/// version differs.
pub const BASELINE_SCHEMA_VERSION: &str = "1.0.0";

/// Fuzzy matching tolerates line drift up to this many lines (inclusive).
pub const FUZZY_LINE_TOLERANCE: u32 = 3;

/// A finding enriched with its stable identity, as stored in a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineIssue {
    /// The recorded finding
    #[serde(flatten)]
    pub finding: Finding,

    /// Stable fingerprint computed at record time
    pub fingerprint: String,

    /// Digest of the snippet, when one was captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_hash: Option<String>,

    /// When this issue first entered the baseline
    pub first_seen: DateTime<Utc>,
}

impl BaselineIssue {
    /// Record a finding into baseline form, computing its fingerprint and
    /// snippet digest.
    pub fn from_finding(finding: Finding, first_seen: DateTime<Utc>) -> Self {
        let fingerprint = generate_fingerprint(&finding);
        let snippet_hash = finding.snippet.as_ref().map(|snippet| {
            let mut hasher = Sha256::new();
            hasher.update(snippet.as_bytes());
            format!("{:x}", hasher.finalize())
        });

        Self {
            finding,
            fingerprint,
            snippet_hash,
            first_seen,
        }
    }
}

/// Metadata block of a baseline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetadata {
    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Tool or user that created the baseline
    pub created_by: String,

    /// Optional project name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Git commit the baseline was taken at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,

    /// Git branch the baseline was taken on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    /// Number of distinct files covered
    pub total_files: usize,

    /// Number of recorded issues
    pub total_issues: usize,

    /// True when the baseline was auto-created on a first PR run
    #[serde(default)]
    pub auto_created: bool,
}

/// Analysis configuration snapshot stored with a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineAnalysisConfig {
    /// Detector ids that produced the recorded issues
    pub detectors: Vec<String>,

    /// Ignore patterns in effect at record time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_patterns: Option<Vec<String>>,
}

/// A persisted baseline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Schema version; major mismatches are rejected on read
    pub version: String,

    /// Document metadata
    pub metadata: BaselineMetadata,

    /// Analysis configuration snapshot
    pub config: BaselineAnalysisConfig,

    /// Recorded issues
    pub issues: Vec<BaselineIssue>,
}

impl Baseline {
    /// Build a baseline from a set of current findings.
    pub fn from_findings(
        findings: &[Finding],
        detectors: Vec<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let issues: Vec<BaselineIssue> = findings
            .iter()
            .map(|finding| BaselineIssue::from_finding(finding.clone(), now))
            .collect();

        let total_files = findings
            .iter()
            .map(Finding::normalized_file)
            .collect::<HashSet<_>>()
            .len();

        Self {
            version: BASELINE_SCHEMA_VERSION.to_string(),
            metadata: BaselineMetadata {
                created_at: now,
                created_by: created_by.into(),
                project_name: None,
                git_commit: None,
                git_branch: None,
                total_files,
                total_issues: findings.len(),
                auto_created: false,
            },
            config: BaselineAnalysisConfig {
                detectors,
                ignore_patterns: None,
            },
            issues,
        }
    }

    /// Mark this baseline as auto-created (first PR run bootstrap).
    pub fn mark_auto_created(mut self) -> Self {
        self.metadata.auto_created = true;
        self
    }

    /// Validate the schema version against the reader's expectation.
    pub fn validate_schema(&self) -> Result<()> {
        let expected_major = major_version(BASELINE_SCHEMA_VERSION);
        let actual_major = major_version(&self.version);

        if expected_major != actual_major {
            return Err(OdavlError::BaselineValidation {
                message: format!(
                    "schema major version mismatch: reader expects {BASELINE_SCHEMA_VERSION}, document carries {}",
                    self.version
                ),
                version: Some(self.version.clone()),
            });
        }
        Ok(())
    }
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Summary counts of a baseline comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    /// Findings with no baseline counterpart
    pub new: usize,
    /// Baseline issues no longer reported
    pub resolved: usize,
    /// Findings matched to a baseline issue
    pub unchanged: usize,
    /// Total current findings
    pub total: usize,
}

/// Reference to the baseline side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRef {
    /// Store name of the baseline
    pub name: String,
    /// Baseline creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Commit recorded with the baseline, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Issues recorded in the baseline
    pub total_issues: usize,
}

/// Reference to the current-run side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRef {
    /// Analysis timestamp
    pub timestamp: DateTime<Utc>,
    /// Findings in the current run
    pub total_issues: usize,
}

/// Full output of a baseline comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// Baseline side
    pub baseline: BaselineRef,
    /// Current side
    pub current: CurrentRef,
    /// Findings classified as new
    pub new_issues: Vec<Finding>,
    /// Baseline issues classified as resolved
    pub resolved_issues: Vec<BaselineIssue>,
    /// Findings matched to the baseline
    pub unchanged_issues: Vec<Finding>,
    /// Summary counts
    pub summary: ComparisonSummary,
}

impl BaselineComparison {
    /// New findings at `Critical` severity — the only class that fails a PR
    /// gate by default.
    pub fn new_critical(&self) -> impl Iterator<Item = &Finding> {
        self.new_issues
            .iter()
            .filter(|finding| finding.severity == Severity::Critical)
    }

    /// Count of new critical findings.
    pub fn new_critical_count(&self) -> usize {
        self.new_critical().count()
    }
}

/// Classify current findings against a baseline.
///
/// Matching runs in order, first hit wins:
/// 1. exact fingerprint equality;
/// 2. fuzzy: same normalized file, same `(detector, rule_id)`, line drift
///    within [`FUZZY_LINE_TOLERANCE`];
/// 3. otherwise the finding is new.
///
/// Baseline issues not matched by either step are resolved.
pub fn compare_with_baseline(
    current: &[Finding],
    baseline: &Baseline,
    baseline_name: &str,
) -> BaselineComparison {
    // Exact lookup: fingerprint -> baseline index
    let mut by_fingerprint: HashMap<&str, usize> = HashMap::new();
    // Fuzzy lookup: "file:rule_id" -> baseline indices
    let mut by_location: HashMap<String, Vec<usize>> = HashMap::new();

    for (idx, issue) in baseline.issues.iter().enumerate() {
        by_fingerprint.entry(&issue.fingerprint).or_insert(idx);
        if let Some(rule_id) = &issue.finding.rule_id {
            let key = format!("{}:{}", issue.finding.normalized_file(), rule_id);
            by_location.entry(key).or_default().push(idx);
        }
    }

    let mut matched: HashSet<usize> = HashSet::new();
    let mut new_issues = Vec::new();
    let mut unchanged_issues = Vec::new();

    for finding in current {
        let fingerprint = generate_fingerprint(finding);

        if let Some(&idx) = by_fingerprint.get(fingerprint.as_str()) {
            if !matched.contains(&idx) {
                matched.insert(idx);
                unchanged_issues.push(finding.clone());
                continue;
            }
        }

        let fuzzy_hit = finding.rule_id.as_ref().and_then(|rule_id| {
            let key = format!("{}:{}", finding.normalized_file(), rule_id);
            by_location.get(&key).and_then(|candidates| {
                candidates.iter().copied().find(|&idx| {
                    !matched.contains(&idx)
                        && baseline.issues[idx].finding.detector == finding.detector
                        && line_distance(baseline.issues[idx].finding.line, finding.line)
                            <= FUZZY_LINE_TOLERANCE
                })
            })
        });

        match fuzzy_hit {
            Some(idx) => {
                matched.insert(idx);
                unchanged_issues.push(finding.clone());
            }
            None => new_issues.push(finding.clone()),
        }
    }

    let resolved_issues: Vec<BaselineIssue> = baseline
        .issues
        .iter()
        .enumerate()
        .filter(|(idx, _)| !matched.contains(idx))
        .map(|(_, issue)| issue.clone())
        .collect();

    let summary = ComparisonSummary {
        new: new_issues.len(),
        resolved: resolved_issues.len(),
        unchanged: unchanged_issues.len(),
        total: current.len(),
    };

    debug!(
        new = summary.new,
        resolved = summary.resolved,
        unchanged = summary.unchanged,
        "baseline comparison complete"
    );

    BaselineComparison {
        baseline: BaselineRef {
            name: baseline_name.to_string(),
            timestamp: baseline.metadata.created_at,
            commit: baseline.metadata.git_commit.clone(),
            total_issues: baseline.metadata.total_issues,
        },
        current: CurrentRef {
            timestamp: Utc::now(),
            total_issues: current.len(),
        },
        new_issues,
        resolved_issues,
        unchanged_issues,
        summary,
    }
}

fn line_distance(a: u32, b: u32) -> u32 {
    a.abs_diff(b)
}

/// Single-writer baseline store rooted at `<state>/baselines/`.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of a named baseline document.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Whether a named baseline exists.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Load and validate a named baseline.
    pub fn load(&self, name: &str) -> Result<Baseline> {
        let path = self.path(name);
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OdavlError::baseline_not_found(name)
            } else {
                OdavlError::io(format!("Failed to read baseline: {}", path.display()), e)
            }
        })?;

        let baseline: Baseline = serde_json::from_str(&content).map_err(|e| {
            OdavlError::baseline_validation(format!(
                "malformed baseline document {}: {e}",
                path.display()
            ))
        })?;

        baseline.validate_schema()?;
        Ok(baseline)
    }

    /// Persist a named baseline atomically (write temp, rename).
    ///
    /// The rename doubles as the single-writer exclusion: readers only ever
    /// observe a complete document.
    pub fn save(&self, name: &str, baseline: &Baseline) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            OdavlError::io(
                format!("Failed to create baseline directory: {}", self.root.display()),
                e,
            )
        })?;

        let path = self.path(name);
        let temp_path = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(baseline)?;
        fs::write(&temp_path, content).map_err(|e| {
            OdavlError::io(format!("Failed to write baseline: {}", temp_path.display()), e)
        })?;

        fs::rename(&temp_path, &path).map_err(|e| {
            OdavlError::io(format!("Failed to rename baseline: {}", path.display()), e)
        })?;

        info!(baseline = name, path = %path.display(), "baseline saved");
        Ok(())
    }

    /// Names of all stored baselines.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(OdavlError::io(
                    format!("Failed to list baselines: {}", self.root.display()),
                    e,
                ))
            }
        };

        for entry in entries {
            let entry = entry
                .map_err(|e| OdavlError::io("Failed to read baseline directory entry", e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
#[path = "baseline_tests.rs"]
mod tests;
