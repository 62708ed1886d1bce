//! Bundled lightweight detectors.
//!
//! Heavyweight detectors (compilers, linters) plug in through the registry;
//! these built-ins keep the pipeline exercisable end-to-end without any
//! external tooling.

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::core::findings::{Finding, IssueCategory, Severity};

use super::{Detector, FileSet};

/// Flags inline credential literals (`password = "..."` and friends).
#[derive(Debug)]
pub struct SecretScanDetector;

const SECRET_KEYS: &[&str] = &["password", "secret", "token", "api_key", "apikey"];

#[async_trait]
impl Detector for SecretScanDetector {
    fn id(&self) -> &str {
        "secret-scan"
    }

    async fn analyze(&self, files: &FileSet) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files.files() {
            let content = files.read(file).await?;
            for (idx, line) in content.lines().enumerate() {
                if is_secret_assignment(line) {
                    findings.push(
                        Finding::new(
                            self.id(),
                            Severity::Critical,
                            IssueCategory::Security,
                            file.clone(),
                            idx as u32 + 1,
                            "Hard-coded credential literal",
                        )
                        .with_rule("SEC001")
                        .with_snippet(line.trim().to_string()),
                    );
                }
            }
        }
        Ok(findings)
    }
}

fn is_secret_assignment(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    let assigns = line.contains('=') || line.contains(':');
    let has_literal = line.contains('"') || line.contains('\'');
    assigns && has_literal && SECRET_KEYS.iter().any(|key| lower.contains(key))
}

/// Flags leftover debug logging statements.
#[derive(Debug)]
pub struct DebugLogDetector;

#[async_trait]
impl Detector for DebugLogDetector {
    fn id(&self) -> &str {
        "debug-logging"
    }

    async fn analyze(&self, files: &FileSet) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files.files() {
            let content = files.read(file).await?;
            for (idx, line) in content.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.starts_with("console.log(")
                    || trimmed.starts_with("console.debug(")
                    || trimmed == "debugger;"
                {
                    findings.push(
                        Finding::new(
                            self.id(),
                            Severity::Low,
                            IssueCategory::Performance,
                            file.clone(),
                            idx as u32 + 1,
                            "Debug logging left in source (perf noise)",
                        )
                        .with_rule("PERF001")
                        .with_snippet(trimmed.to_string()),
                    );
                }
            }
        }
        Ok(findings)
    }
}

/// Tracks TODO and FIXME markers as informational findings.
#[derive(Debug)]
pub struct TodoTrackerDetector;

#[async_trait]
impl Detector for TodoTrackerDetector {
    fn id(&self) -> &str {
        "todo-tracker"
    }

    async fn analyze(&self, files: &FileSet) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files.files() {
            let content = files.read(file).await?;
            for (idx, line) in content.lines().enumerate() {
                if line.contains("TODO") || line.contains("FIXME") {
                    findings.push(
                        Finding::new(
                            self.id(),
                            Severity::Info,
                            IssueCategory::Syntax,
                            file.clone(),
                            idx as u32 + 1,
                            "Tracked work marker",
                        )
                        .with_rule("TODO001"),
                    );
                }
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn run(detector: &dyn Detector, file: &str, content: &str) -> Vec<Finding> {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(file), content).await.unwrap();
        let set = FileSet::new(dir.path(), vec![file.to_string()]);
        detector.analyze(&set).await.unwrap()
    }

    #[tokio::test]
    async fn test_secret_scan_flags_credentials() {
        let findings = run(
            &SecretScanDetector,
            "db.ts",
            "const password = \"hunter2\";\nconst port = 5432;\n",
        )
        .await;

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].rule_id.as_deref(), Some("SEC001"));
        assert_eq!(findings[0].line, 1);
    }

    #[tokio::test]
    async fn test_debug_log_detector() {
        let findings = run(
            &DebugLogDetector,
            "app.ts",
            "const a = 1;\nconsole.log(a);\ndebugger;\n",
        )
        .await;

        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.category == IssueCategory::Performance));
    }

    #[tokio::test]
    async fn test_todo_tracker_is_informational() {
        let findings = run(&TodoTrackerDetector, "app.ts", "// TODO tidy this\n").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
    }
}
