//! Finding data model shared by detectors, intake, and the baseline store.
//!
//! Findings are ephemeral per analysis run; everything downstream (delta
//! computation, fix candidates, verification) consumes them through the
//! deterministic ordering defined here.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Issue severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational findings, including captured detector diagnostics
    Info,
    /// Low-impact issues
    Low,
    /// Medium-impact issues
    Medium,
    /// High-impact issues
    High,
    /// Critical issues; the only class that can fail a PR gate
    Critical,
}

impl Severity {
    /// Priority contribution of this severity.
    pub fn score(self) -> f64 {
        match self {
            Self::Critical => 40.0,
            Self::High => 30.0,
            Self::Medium => 20.0,
            Self::Low => 10.0,
            Self::Info => 0.0,
        }
    }

    /// Normalize a numeric or textual severity label from a detector.
    ///
    /// Detectors report severity in whatever vocabulary their upstream tool
    /// uses; this maps the common numeric ("0".."4") and textual forms onto
    /// the canonical scale. Unknown labels degrade to `Info`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "fatal" | "blocker" | "4" => Self::Critical,
            "error" | "high" | "major" | "3" => Self::High,
            "warning" | "warn" | "medium" | "2" => Self::Medium,
            "low" | "minor" | "1" => Self::Low,
            "info" | "hint" | "note" | "0" => Self::Info,
            _ => Self::Info,
        }
    }

    /// Canonical lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

/// Issue category assigned by intake.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    /// Syntax and type errors
    Syntax,
    /// Import resolution and ordering issues
    Import,
    /// Build configuration issues
    Build,
    /// Security-sensitive findings
    Security,
    /// Performance problems
    Performance,
    /// Circular dependency findings
    Circular,
    /// Module isolation violations
    Isolation,
    /// Network usage findings
    Network,
    /// Dependency drift between manifest and lockfile
    PackageDrift,
}

impl IssueCategory {
    /// Priority contribution of this category.
    pub fn score(self) -> f64 {
        match self {
            Self::Security => 100.0,
            Self::Build => 80.0,
            Self::Circular => 75.0,
            Self::Performance => 60.0,
            Self::Network => 55.0,
            Self::Isolation => 50.0,
            Self::Import => 40.0,
            Self::Syntax => 30.0,
            Self::PackageDrift => 20.0,
        }
    }

    /// Estimated lines of code a fix in this category will change.
    pub fn estimated_loc(self) -> u32 {
        match self {
            Self::Syntax => 5,
            Self::Import => 3,
            Self::Security => 15,
            Self::Circular => 25,
            Self::Performance => 20,
            Self::Isolation => 15,
            Self::Network => 10,
            Self::Build => 10,
            Self::PackageDrift => 5,
        }
    }

    /// Canonical kebab-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::Build => "build",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Circular => "circular",
            Self::Isolation => "isolation",
            Self::Network => "network",
            Self::PackageDrift => "package-drift",
        }
    }
}

/// A single issue reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Detector that produced this finding
    pub detector: String,

    /// Severity on the canonical scale
    pub severity: Severity,

    /// Category assigned by the detector or inferred by intake
    pub category: IssueCategory,

    /// Workspace-relative file path
    pub file: String,

    /// 1-based line number
    pub line: u32,

    /// Optional column number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,

    /// Optional rule id (e.g. `TS2322`, `SEC001`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Optional code snippet around the issue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Finding {
    /// Create a finding with the mandatory fields; optional fields default
    /// to `None`.
    pub fn new(
        detector: impl Into<String>,
        severity: Severity,
        category: IssueCategory,
        file: impl Into<String>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            detector: detector.into(),
            severity,
            category,
            file: file.into(),
            line,
            column: None,
            rule_id: None,
            message: message.into(),
            snippet: None,
        }
    }

    /// Set the rule id
    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Set the code snippet
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Set the column
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    /// Workspace-relative path with forward slashes, lowercase drive-letter
    /// free. Fingerprints and baseline matching always use this form.
    pub fn normalized_file(&self) -> String {
        self.file.replace('\\', "/")
    }

    /// Deterministic ordering key `(file, line, detector, rule_id)` used by
    /// both detector executors before returning results.
    pub fn sort_key(&self) -> (String, u32, String, String) {
        (
            self.normalized_file(),
            self.line,
            self.detector.clone(),
            self.rule_id.clone().unwrap_or_default(),
        )
    }

    /// Compare two findings by the deterministic key.
    pub fn deterministic_cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
