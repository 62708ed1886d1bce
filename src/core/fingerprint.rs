//! Deterministic finding fingerprints.
//!
//! A fingerprint gives a finding a stable identity across runs and hosts so
//! the baseline store can compute deltas instead of absolute counts. Three
//! tiers are tried in priority order; the richest available wins:
//!
//! 1. content   — rule id + detector + severity + snippet (full digest)
//! 2. location  — file + line + detector + rule id (16-char prefix)
//! 3. message   — file + line + message (16-char prefix)
//!
//! Tier 3 always applies, so every finding carries a non-empty fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::findings::Finding;

/// Length of the truncated hex digest for location and message tiers.
const SHORT_FINGERPRINT_LEN: usize = 16;

/// Which strategy produced a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintTier {
    /// Rule id and snippet were both present
    Content,
    /// Rule id present, snippet absent
    Location,
    /// Last resort: file, line, and message only
    Message,
}

/// Generate the fingerprint for a finding.
///
/// Pure function: identical findings produce identical fingerprints on any
/// host. The returned string is lowercase hex and never empty.
pub fn generate_fingerprint(finding: &Finding) -> String {
    generate_with_tier(finding).0
}

/// Report which tier applies to a finding without computing the digest twice.
pub fn fingerprint_tier(finding: &Finding) -> FingerprintTier {
    generate_with_tier(finding).1
}

/// Generate the fingerprint together with the tier that produced it.
pub fn generate_with_tier(finding: &Finding) -> (String, FingerprintTier) {
    match (&finding.rule_id, &finding.snippet) {
        (Some(rule_id), Some(snippet)) => {
            let input = format!(
                "{}:{}:{}:{}",
                rule_id,
                finding.detector,
                finding.severity.as_str(),
                snippet
            );
            (sha256_hex(&input), FingerprintTier::Content)
        }
        (Some(rule_id), None) => {
            let input = format!(
                "{}:{}:{}:{}",
                finding.normalized_file(),
                finding.line,
                finding.detector,
                rule_id
            );
            (short_digest(&input), FingerprintTier::Location)
        }
        _ => {
            let input = format!(
                "{}:{}:{}",
                finding.normalized_file(),
                finding.line,
                finding.message
            );
            (short_digest(&input), FingerprintTier::Message)
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn short_digest(input: &str) -> String {
    let mut digest = sha256_hex(input);
    digest.truncate(SHORT_FINGERPRINT_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::findings::{IssueCategory, Severity};

    fn base_finding() -> Finding {
        Finding::new(
            "typescript",
            Severity::High,
            IssueCategory::Syntax,
            "src/app.ts",
            42,
            "Type 'string' is not assignable to type 'number'",
        )
    }

    #[test]
    fn test_content_tier_when_rule_and_snippet_present() {
        let finding = base_finding()
            .with_rule("TS2322")
            .with_snippet("const x: number = \"y\";");

        let (fp, tier) = generate_with_tier(&finding);
        assert_eq!(tier, FingerprintTier::Content);
        assert_eq!(fp.len(), 64);
    }

    #[test]
    fn test_location_tier_without_snippet() {
        let finding = base_finding().with_rule("TS2322");

        let (fp, tier) = generate_with_tier(&finding);
        assert_eq!(tier, FingerprintTier::Location);
        assert_eq!(fp.len(), SHORT_FINGERPRINT_LEN);
    }

    #[test]
    fn test_message_tier_as_last_resort() {
        let finding = base_finding();

        let (fp, tier) = generate_with_tier(&finding);
        assert_eq!(tier, FingerprintTier::Message);
        assert_eq!(fp.len(), SHORT_FINGERPRINT_LEN);
        assert!(!fp.is_empty());
    }

    #[test]
    fn test_fingerprint_is_pure() {
        let finding = base_finding().with_rule("TS2322");
        assert_eq!(generate_fingerprint(&finding), generate_fingerprint(&finding));
    }

    #[test]
    fn test_fingerprint_ignores_path_separator_style() {
        let unix = base_finding().with_rule("TS2322");
        let mut windows = unix.clone();
        windows.file = "src\\app.ts".to_string();

        assert_eq!(generate_fingerprint(&unix), generate_fingerprint(&windows));
    }

    #[test]
    fn test_distinct_findings_distinct_fingerprints() {
        let a = base_finding().with_rule("TS2322");
        let b = base_finding().with_rule("TS2345");

        assert_ne!(generate_fingerprint(&a), generate_fingerprint(&b));
    }

    #[test]
    fn test_snippet_changes_content_fingerprint() {
        let a = base_finding().with_rule("TS2322").with_snippet("let x = 1;");
        let b = base_finding().with_rule("TS2322").with_snippet("let x = 2;");

        assert_ne!(generate_fingerprint(&a), generate_fingerprint(&b));
    }
}
