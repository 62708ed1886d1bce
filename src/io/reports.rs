//! Canonical session reports with content-hash attestation.
//!
//! Every self-heal session emits one OMS report document. The report is
//! written atomically to a content-addressed path under the state
//! directory; a sha256 over the serialized document (minus the footer) is
//! embedded as the footer and logged for attestation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::errors::Result;
use crate::core::execution::RecipeExecutionResult;
use crate::core::findings::Finding;
use crate::core::recipes::FixDiff;
use crate::core::scoring::SafetyClass;
use crate::io::state::{write_json_atomic, StateDir};

/// Report schema identifier.
pub const REPORT_SCHEMA: &str = "autopilot-session";

/// Report document version.
pub const REPORT_VERSION: &str = "1.0.0";

/// Session summary section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Final state of the session state machine
    pub state: String,
    /// Final outcome label
    pub final_outcome: String,
    /// Session wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Observed findings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedIssues {
    /// Total findings observed
    pub total: usize,
    /// Finding counts keyed by severity label, stable order
    pub by_severity: IndexMap<String, usize>,
    /// The findings themselves
    pub findings: Vec<Finding>,
}

impl DetectedIssues {
    /// Summarize a finding list.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut by_severity: IndexMap<String, usize> = IndexMap::new();
        for label in ["critical", "high", "medium", "low", "info"] {
            by_severity.insert(label.to_string(), 0);
        }
        for finding in findings {
            *by_severity
                .entry(finding.severity.as_str().to_string())
                .or_insert(0) += 1;
        }

        Self {
            total: findings.len(),
            by_severity,
            findings: findings.to_vec(),
        }
    }
}

/// One selected recipe as recorded in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedRecipeSummary {
    /// Recipe id
    pub recipe_id: String,
    /// Final blended score
    pub final_score: f64,
    /// Safety classification
    pub safety_class: SafetyClass,
    /// Files this recipe targets
    pub files: Vec<String>,
}

/// Average scores across selected recipes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceSection {
    /// Average ML confidence
    pub avg_ml_score: f64,
    /// Average trust
    pub avg_trust_score: f64,
    /// Average fusion score
    pub avg_fusion_score: f64,
    /// Average final score
    pub avg_final_score: f64,
}

/// Verification guardian summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianResult {
    /// Whether verification passed with no new critical issues
    pub verified: bool,
    /// New critical issues introduced across executed recipes
    pub new_critical_issues: usize,
}

/// Confidence movement over the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrainConfidence {
    /// Average trust before the session
    pub before: f64,
    /// Average trust after the session
    pub after: f64,
    /// Net improvement
    pub improvement: f64,
}

/// Final decision section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutcomeSection {
    /// Outcome decision label
    pub decision: String,
    /// Reasoning notes, in decision order
    pub reasoning: Vec<String>,
    /// Whether any recipe was automatically reverted
    pub auto_reverted: bool,
}

/// Rollback detail, present only when something was reverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSection {
    /// Why the rollback happened
    pub reason: String,
    /// Files restored from snapshots
    pub files_reverted: Vec<String>,
}

/// The canonical session report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Document version
    pub version: String,
    /// Schema identifier, always [`REPORT_SCHEMA`]
    pub schema: String,
    /// Report timestamp
    pub timestamp: DateTime<Utc>,
    /// Session id
    pub session_id: String,
    /// Session summary
    pub session: SessionSection,
    /// Observed findings
    pub detected_issues: DetectedIssues,
    /// Selected recipes
    pub selected_recipes: Vec<SelectedRecipeSummary>,
    /// Per-recipe execution results
    pub execution: Vec<RecipeExecutionResult>,
    /// Average scores
    pub intelligence: IntelligenceSection,
    /// Diffs of applied fixes
    pub fix_diffs: Vec<FixDiff>,
    /// Verification guardian summary, when verification ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian_result: Option<GuardianResult>,
    /// Trust movement
    pub brain_confidence: BrainConfidence,
    /// Final decision
    pub final_outcome: FinalOutcomeSection,
    /// Rollback detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSection>,
    /// Attestation footer: sha256 over the document without this field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl SessionReport {
    /// Compute the attestation hash over the document without its footer.
    pub fn compute_content_hash(&self) -> Result<String> {
        let mut unfooted = self.clone();
        unfooted.content_hash = None;
        let serialized = serde_json::to_vec(&unfooted)?;

        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verify the embedded footer against the document content.
    pub fn verify_content_hash(&self) -> Result<bool> {
        match &self.content_hash {
            Some(footer) => Ok(*footer == self.compute_content_hash()?),
            None => Ok(false),
        }
    }
}

/// Writes attested session reports under the state directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    state: StateDir,
}

impl ReportWriter {
    /// Writer rooted at a state directory.
    pub fn new(state: StateDir) -> Self {
        Self { state }
    }

    /// Seal the report with its content hash and write it atomically to the
    /// content-addressed path. Returns the path and the hash.
    pub fn write(&self, report: &SessionReport) -> Result<(PathBuf, String)> {
        let mut sealed = report.clone();
        let hash = sealed.compute_content_hash()?;
        sealed.content_hash = Some(hash.clone());

        let path = self.state.report_path(&sealed.session_id);
        write_json_atomic(&path, &sealed)?;

        info!(
            session = %sealed.session_id,
            path = %path.display(),
            content_hash = %hash,
            "session report attested"
        );
        Ok((path, hash))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::core::findings::{IssueCategory, Severity};

    fn sample_report() -> SessionReport {
        let findings = vec![Finding::new(
            "secret-scan",
            Severity::Critical,
            IssueCategory::Security,
            "src/db.ts",
            10,
            "Hard-coded credential literal",
        )
        .with_rule("SEC001")];

        SessionReport {
            version: REPORT_VERSION.to_string(),
            schema: REPORT_SCHEMA.to_string(),
            timestamp: Utc::now(),
            session_id: "heal-1700000000000".to_string(),
            session: SessionSection {
                state: "DONE".to_string(),
                final_outcome: "success".to_string(),
                duration_ms: 840,
            },
            detected_issues: DetectedIssues::from_findings(&findings),
            selected_recipes: vec![SelectedRecipeSummary {
                recipe_id: "fix-security".to_string(),
                final_score: 0.87,
                safety_class: SafetyClass::Safe,
                files: vec!["src/db.ts".to_string()],
            }],
            execution: Vec::new(),
            intelligence: IntelligenceSection {
                avg_ml_score: 0.5,
                avg_trust_score: 0.5,
                avg_fusion_score: 0.5,
                avg_final_score: 0.5,
            },
            fix_diffs: Vec::new(),
            guardian_result: Some(GuardianResult {
                verified: true,
                new_critical_issues: 0,
            }),
            brain_confidence: BrainConfidence {
                before: 0.5,
                after: 0.65,
                improvement: 0.15,
            },
            final_outcome: FinalOutcomeSection {
                decision: "success".to_string(),
                reasoning: vec!["all executed recipes verified clean".to_string()],
                auto_reverted: false,
            },
            rollback: None,
            content_hash: None,
        }
    }

    #[test]
    fn test_detected_issues_severity_counts() {
        let report = sample_report();
        assert_eq!(report.detected_issues.total, 1);
        assert_eq!(report.detected_issues.by_severity["critical"], 1);
        assert_eq!(report.detected_issues.by_severity["info"], 0);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let report = sample_report();
        assert_eq!(
            report.compute_content_hash().unwrap(),
            report.compute_content_hash().unwrap()
        );
    }

    #[test]
    fn test_content_hash_excludes_footer() {
        let mut report = sample_report();
        let bare = report.compute_content_hash().unwrap();
        report.content_hash = Some(bare.clone());
        assert_eq!(report.compute_content_hash().unwrap(), bare);
        assert!(report.verify_content_hash().unwrap());
    }

    #[test]
    fn test_tampering_breaks_attestation() {
        let mut report = sample_report();
        report.content_hash = Some(report.compute_content_hash().unwrap());
        report.session.final_outcome = "partial".to_string();
        assert!(!report.verify_content_hash().unwrap());
    }

    #[test]
    fn test_write_and_roundtrip() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::for_workspace(dir.path());
        let writer = ReportWriter::new(state.clone());

        let report = sample_report();
        let (path, hash) = writer.write(&report).unwrap();

        assert_eq!(path, state.report_path(&report.session_id));
        let restored: SessionReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored.content_hash.as_deref(), Some(hash.as_str()));
        assert!(restored.verify_content_hash().unwrap());

        // serialize . deserialize is identity over everything but the
        // freshly sealed footer.
        let mut unsealed = restored.clone();
        unsealed.content_hash = None;
        let mut original = report;
        original.content_hash = None;
        assert_eq!(unsealed, original);
    }
}
