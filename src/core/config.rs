//! Configuration types for the analysis and self-healing engines.
//!
//! Every knob is an explicit field with a default; unknown keys are
//! rejected at load time. YAML is the on-disk format, matching the policy
//! rule file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{OdavlError, Result};
use crate::core::execution::{default_max_workers, DEFAULT_RECIPE_TIMEOUT_SECS};
use crate::core::scoring::ScoringFilter;

/// CI environment variables checked for CI detection.
const CI_ENV_VARS: &[&str] = &["GITHUB_ACTIONS", "GITLAB_CI", "JENKINS_HOME"];

/// Delta policy mode for CI runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiMode {
    /// Fail on new critical findings only
    Pr,
    /// Never fail on quality issues
    Main,
    /// Record trends; never fail
    Nightly,
}

impl CiMode {
    /// Whether this mode fails the run on new critical findings.
    pub fn fails_on_new_critical(self) -> bool {
        matches!(self, Self::Pr)
    }
}

/// Analysis (Insight) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AnalysisSettings {
    /// Detector ids to run
    pub detectors: Vec<String>,

    /// Glob patterns excluded from discovery
    pub ignore_patterns: Vec<String>,

    /// Restrict analysis to changed files
    pub changed_only: bool,

    /// Force CI determinism even when no CI environment is detected
    pub ci: bool,

    /// Delta policy mode
    pub ci_mode: CiMode,

    /// Baseline name compared against
    pub baseline: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            detectors: vec![
                "secret-scan".to_string(),
                "debug-logging".to_string(),
                "todo-tracker".to_string(),
            ],
            ignore_patterns: vec![
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/dist/**".to_string(),
                "**/.git/**".to_string(),
                "**/.odavl/**".to_string(),
            ],
            changed_only: false,
            ci: false,
            ci_mode: CiMode::Pr,
            baseline: "main".to_string(),
        }
    }
}

impl AnalysisSettings {
    /// Validate analysis settings.
    pub fn validate(&self) -> Result<()> {
        if self.detectors.is_empty() {
            return Err(OdavlError::config_field(
                "at least one detector must be enabled",
                "analysis.detectors",
            ));
        }
        if self.baseline.trim().is_empty() {
            return Err(OdavlError::config_field(
                "baseline name must not be empty",
                "analysis.baseline",
            ));
        }
        Ok(())
    }
}

/// Autopilot (self-healing) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AutopilotSettings {
    /// Maximum files a single recipe may touch
    pub max_files: usize,

    /// Maximum estimated lines a single recipe may change
    pub max_loc: u32,

    /// Plan without mutating
    pub dry_run: bool,

    /// On first failure, roll back everything executed so far and stop
    pub fail_fast: bool,

    /// Concurrent recipes per chunk
    pub max_workers: usize,

    /// Per-recipe wall-clock budget in seconds
    pub recipe_timeout_secs: u64,

    /// Recipe scoring thresholds
    pub scoring: ScoringFilter,
}

impl Default for AutopilotSettings {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_loc: 40,
            dry_run: false,
            fail_fast: true,
            max_workers: default_max_workers(),
            recipe_timeout_secs: DEFAULT_RECIPE_TIMEOUT_SECS,
            scoring: ScoringFilter::default(),
        }
    }
}

impl AutopilotSettings {
    /// Validate autopilot settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            return Err(OdavlError::config_field(
                "max_files must be at least 1",
                "autopilot.max_files",
            ));
        }
        if self.max_loc == 0 {
            return Err(OdavlError::config_field(
                "max_loc must be at least 1",
                "autopilot.max_loc",
            ));
        }
        if self.max_workers == 0 {
            return Err(OdavlError::config_field(
                "max_workers must be at least 1",
                "autopilot.max_workers",
            ));
        }
        if self.recipe_timeout_secs == 0 {
            return Err(OdavlError::config_field(
                "recipe_timeout_secs must be at least 1",
                "autopilot.recipe_timeout_secs",
            ));
        }
        if self.scoring.max_recipes == 0 {
            return Err(OdavlError::config_field(
                "scoring.max_recipes must be at least 1",
                "autopilot.scoring.max_recipes",
            ));
        }
        for (value, field) in [
            (self.scoring.min_ml_score, "autopilot.scoring.min_ml_score"),
            (self.scoring.min_trust_score, "autopilot.scoring.min_trust_score"),
            (self.scoring.min_fusion_score, "autopilot.scoring.min_fusion_score"),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OdavlError::config_field(
                    format!("{field} must be in [0, 1], got {value}"),
                    field,
                ));
            }
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OdavlConfig {
    /// Analysis settings
    pub analysis: AnalysisSettings,

    /// Self-healing settings
    pub autopilot: AutopilotSettings,

    /// Policy rule file; built-in defaults apply when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,

    /// Explicit state directory; `.odavl/` under the workspace otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl OdavlConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OdavlError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| OdavlError::config(format!("malformed config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            OdavlError::io(format!("Failed to write config file: {}", path.display()), e)
        })
    }

    /// Validate all settings.
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.autopilot.validate()?;
        Ok(())
    }
}

/// Whether the process appears to run under a CI system.
pub fn detect_ci() -> bool {
    CI_ENV_VARS
        .iter()
        .any(|var| std::env::var_os(var).is_some())
}

/// Session id propagated from the environment, when set.
pub fn session_id_from_env() -> Option<String> {
    std::env::var("ODAVL_SESSION_ID").ok().filter(|id| !id.is_empty())
}

/// Insight engine version pinned by the environment, when set.
pub fn insight_version_from_env() -> Option<String> {
    std::env::var("INSIGHT_VERSION").ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_validate() {
        OdavlConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ci_mode_gating() {
        assert!(CiMode::Pr.fails_on_new_critical());
        assert!(!CiMode::Main.fails_on_new_critical());
        assert!(!CiMode::Nightly.fails_on_new_critical());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = OdavlConfig::default();
        config.autopilot.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = OdavlConfig::default();
        config.analysis.detectors.clear();
        assert!(config.validate().is_err());

        let mut config = OdavlConfig::default();
        config.autopilot.scoring.min_trust_score = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odavl.yml");

        let config = OdavlConfig::default();
        config.to_yaml_file(&path).unwrap();
        let restored = OdavlConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odavl.yml");
        std::fs::write(&path, "analysis:\n  not_a_field: 1\n").unwrap();

        let err = OdavlConfig::from_yaml_file(&path).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    #[serial]
    fn test_ci_detection() {
        std::env::remove_var("GITHUB_ACTIONS");
        std::env::remove_var("GITLAB_CI");
        std::env::remove_var("JENKINS_HOME");
        assert!(!detect_ci());

        std::env::set_var("GITHUB_ACTIONS", "true");
        assert!(detect_ci());
        std::env::remove_var("GITHUB_ACTIONS");
    }

    #[test]
    #[serial]
    fn test_session_id_from_env() {
        std::env::remove_var("ODAVL_SESSION_ID");
        assert!(session_id_from_env().is_none());

        std::env::set_var("ODAVL_SESSION_ID", "heal-42");
        assert_eq!(session_id_from_env().as_deref(), Some("heal-42"));
        std::env::remove_var("ODAVL_SESSION_ID");
    }
}
