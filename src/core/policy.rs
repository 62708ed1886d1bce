//! Policy engine: allow/deny rules, protected paths, and the audit trail.
//!
//! Deny rules are evaluated first and the first match wins; allow rules run
//! next; otherwise the configured default applies. Non-conformant policy
//! files are rejected at load time — a policy that could block the main
//! branch on quality, fail on legacy findings, or upload source without
//! consent never reaches evaluation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::errors::{OdavlError, Result};

/// Commands every policy must guard with at least one deny rule.
const MANDATORY_DENY_GUARDS: &[&str] = &["rm", "delete", "format"];

/// Reason class attached to a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyReason {
    /// An allow rule matched
    Allow,
    /// A deny rule matched
    Deny,
    /// No rule matched; the default applied
    Unknown,
}

/// One allow or deny rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRule {
    /// Glob pattern matched against the command string
    pub pattern: String,

    /// Why this rule exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Default decision when no rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefault {
    /// `allow` or `deny`
    pub action: String,

    /// Reason recorded with default decisions
    pub reason: String,

    /// Safety level label for the default path
    pub safety_level: String,

    /// Whether defaulted operations need a human in the loop
    pub require_approval: bool,
}

/// Audit logging knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyLogging {
    /// Include rule reasons in audit lines
    pub include_reason: bool,

    /// Log level for policy decisions
    pub log_level: String,

    /// Whether the audit trail is enabled
    pub audit_trail: bool,
}

/// Main-branch behavior switches. `block_on_quality` must be false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainBranchPolicy {
    /// Never allowed to be true: main mode never fails on quality issues
    #[serde(default)]
    pub block_on_quality: bool,
}

/// Forbidden behavior switches; all must be false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AntiPatternPolicy {
    /// Failing CI on pre-existing (legacy) findings
    #[serde(default)]
    pub fail_on_legacy: bool,

    /// Failing CI on medium or low severity findings
    #[serde(default)]
    pub fail_on_medium_or_low: bool,

    /// Uploading source without explicit consent
    #[serde(default)]
    pub auto_upload_without_consent: bool,
}

/// The policy rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Rule file format version
    pub version: String,

    /// Overall safety posture label
    pub safety_level: String,

    /// Allow rules, evaluated after deny rules
    #[serde(default)]
    pub allow: Vec<PolicyRule>,

    /// Deny rules, evaluated first
    #[serde(default)]
    pub deny: Vec<PolicyRule>,

    /// Default decision when nothing matches
    pub default: PolicyDefault,

    /// Audit logging configuration
    pub logging: PolicyLogging,

    /// Main-branch switches
    #[serde(default)]
    pub main: MainBranchPolicy,

    /// Forbidden behavior switches
    #[serde(default)]
    pub anti_patterns: AntiPatternPolicy,

    /// Protected path patterns; recipes touching these are always skipped
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
}

fn default_protected_paths() -> Vec<String> {
    vec![
        "security/**".to_string(),
        "auth/**".to_string(),
        "**/*.test.*".to_string(),
    ]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            safety_level: "strict".to_string(),
            allow: vec![
                PolicyRule {
                    pattern: "recipe:*".to_string(),
                    reason: Some("registered recipes run under scorer gating".to_string()),
                },
                PolicyRule {
                    pattern: "git status*".to_string(),
                    reason: Some("read-only".to_string()),
                },
            ],
            deny: vec![
                PolicyRule {
                    pattern: "rm *".to_string(),
                    reason: Some("destructive file removal".to_string()),
                },
                PolicyRule {
                    pattern: "*delete*".to_string(),
                    reason: Some("destructive deletion".to_string()),
                },
                PolicyRule {
                    pattern: "format *".to_string(),
                    reason: Some("destructive volume operation".to_string()),
                },
            ],
            default: PolicyDefault {
                action: "deny".to_string(),
                reason: "command not in allow list".to_string(),
                safety_level: "strict".to_string(),
                require_approval: true,
            },
            logging: PolicyLogging {
                include_reason: true,
                log_level: "info".to_string(),
                audit_trail: true,
            },
            main: MainBranchPolicy::default(),
            anti_patterns: AntiPatternPolicy::default(),
            protected_paths: default_protected_paths(),
        }
    }
}

impl PolicyConfig {
    /// Load and validate a policy rule file.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|e| {
            OdavlError::io(format!("Failed to read policy file: {}", path.display()), e)
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| OdavlError::config_field(format!("malformed policy file: {e}"), "policy"))?;
        config.validate()?;
        Ok(config)
    }

    /// Enforce the hard invariants. A non-conformant policy is a
    /// configuration error, not a runtime condition.
    pub fn validate(&self) -> Result<()> {
        if self.main.block_on_quality {
            return Err(OdavlError::config_field(
                "main.block_on_quality must be false: main mode never fails on quality issues",
                "main.block_on_quality",
            ));
        }
        if self.anti_patterns.fail_on_legacy {
            return Err(OdavlError::config_field(
                "anti_patterns.fail_on_legacy must be false",
                "anti_patterns.fail_on_legacy",
            ));
        }
        if self.anti_patterns.fail_on_medium_or_low {
            return Err(OdavlError::config_field(
                "anti_patterns.fail_on_medium_or_low must be false",
                "anti_patterns.fail_on_medium_or_low",
            ));
        }
        if self.anti_patterns.auto_upload_without_consent {
            return Err(OdavlError::config_field(
                "anti_patterns.auto_upload_without_consent must be false",
                "anti_patterns.auto_upload_without_consent",
            ));
        }

        for guard in MANDATORY_DENY_GUARDS {
            let guarded = self.deny.iter().any(|rule| rule.pattern.contains(guard));
            if !guarded {
                return Err(OdavlError::config_field(
                    format!("no deny rule guards '{guard}'"),
                    "deny",
                ));
            }
        }

        Ok(())
    }
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the operation may proceed
    pub approved: bool,

    /// Which path produced the decision
    pub safety_reason: SafetyReason,

    /// Matching rule pattern, when a rule decided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// True when the default decided
    pub default_applied: bool,

    /// Whether a human must approve before the operation runs
    pub requires_manual_approval: bool,
}

/// One line of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Evaluated command
    pub command: String,
    /// Decision outcome
    pub approved: bool,
    /// Reason class
    pub safety_reason: SafetyReason,
    /// Matching rule, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// True when the default applied
    pub default_applied: bool,
    /// Whether manual approval is required
    pub requires_manual_approval: bool,
    /// Evaluation timestamp
    pub timestamp: DateTime<Utc>,
    /// Session the evaluation belongs to
    pub session_id: String,
    /// Evaluating process id
    pub pid: u32,
}

/// Append-only audit log, one self-contained JSON line per evaluation.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    session_id: String,
}

impl AuditLog {
    /// Create a logger writing to `path` under the given session id.
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    /// Append one evaluation. Concurrent appenders are safe at line
    /// granularity because each line is written in a single call.
    pub fn append(&self, command: &str, decision: &PolicyDecision) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OdavlError::io(
                    format!("Failed to create audit directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let entry = AuditEntry {
            command: command.to_string(),
            approved: decision.approved,
            safety_reason: decision.safety_reason,
            rule: decision.rule.clone(),
            default_applied: decision.default_applied,
            requires_manual_approval: decision.requires_manual_approval,
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            pid: std::process::id(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                OdavlError::io(format!("Failed to open audit log: {}", self.path.display()), e)
            })?;
        file.write_all(line.as_bytes()).map_err(|e| {
            OdavlError::io(format!("Failed to append audit log: {}", self.path.display()), e)
        })?;

        Ok(())
    }
}

/// Compiled policy engine.
pub struct PolicyEngine {
    config: PolicyConfig,
    deny_matchers: Vec<GlobMatcher>,
    allow_matchers: Vec<GlobMatcher>,
    protected: GlobSet,
    audit: Option<AuditLog>,
}

impl PolicyEngine {
    /// Compile a validated policy config.
    pub fn new(config: PolicyConfig) -> Result<Self> {
        config.validate()?;

        let compile = |rules: &[PolicyRule]| -> Result<Vec<GlobMatcher>> {
            rules
                .iter()
                .map(|rule| {
                    Glob::new(&rule.pattern)
                        .map(|glob| glob.compile_matcher())
                        .map_err(|e| {
                            OdavlError::config_field(
                                format!("invalid rule pattern '{}': {e}", rule.pattern),
                                "policy",
                            )
                        })
                })
                .collect()
        };

        let deny_matchers = compile(&config.deny)?;
        let allow_matchers = compile(&config.allow)?;

        let mut builder = GlobSetBuilder::new();
        for pattern in &config.protected_paths {
            let glob = Glob::new(pattern).map_err(|e| {
                OdavlError::config_field(
                    format!("invalid protected path pattern '{pattern}': {e}"),
                    "protected_paths",
                )
            })?;
            builder.add(glob);
        }
        let protected = builder.build().map_err(|e| {
            OdavlError::config_field(format!("failed to build protected path set: {e}"), "policy")
        })?;

        Ok(Self {
            config,
            deny_matchers,
            allow_matchers,
            protected,
            audit: None,
        })
    }

    /// Attach the audit trail; every evaluation is appended to it.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Evaluate a command: deny rules first (first match wins), then allow
    /// rules, then the default. The decision is appended to the audit trail
    /// when one is attached.
    pub fn evaluate(&self, command: &str) -> Result<PolicyDecision> {
        let decision = self.decide(command);

        if self.config.logging.audit_trail {
            if let Some(audit) = &self.audit {
                audit.append(command, &decision)?;
            }
        }

        if !decision.approved {
            warn!(command, "policy denied operation");
        } else {
            debug!(command, "policy approved operation");
        }

        Ok(decision)
    }

    fn decide(&self, command: &str) -> PolicyDecision {
        for (idx, matcher) in self.deny_matchers.iter().enumerate() {
            if matcher.is_match(command) {
                return PolicyDecision {
                    approved: false,
                    safety_reason: SafetyReason::Deny,
                    rule: Some(self.config.deny[idx].pattern.clone()),
                    default_applied: false,
                    requires_manual_approval: false,
                };
            }
        }

        for (idx, matcher) in self.allow_matchers.iter().enumerate() {
            if matcher.is_match(command) {
                return PolicyDecision {
                    approved: true,
                    safety_reason: SafetyReason::Allow,
                    rule: Some(self.config.allow[idx].pattern.clone()),
                    default_applied: false,
                    requires_manual_approval: false,
                };
            }
        }

        PolicyDecision {
            approved: self.config.default.action == "allow",
            safety_reason: SafetyReason::Unknown,
            rule: None,
            default_applied: true,
            requires_manual_approval: self.config.default.require_approval,
        }
    }

    /// Whether a workspace-relative path is protected.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.is_match(path.replace('\\', "/"))
    }

    /// The loaded configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}
