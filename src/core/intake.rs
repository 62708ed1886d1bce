//! Intake: normalizes raw findings into prioritized fix candidates.
//!
//! Risk weights come from a path taxonomy (most specific pattern wins),
//! categories are inferred by keyword matching, and candidates are emitted
//! in deterministic priority order so downstream scoring is reproducible.

use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{OdavlError, Result};
use crate::core::findings::{Finding, IssueCategory};
use crate::core::fingerprint::generate_fingerprint;
use crate::core::recipes::RecipeRegistry;

/// Default risk weight for paths no taxonomy pattern matches.
pub const DEFAULT_RISK_WEIGHT: f64 = 0.5;

/// One taxonomy entry: a glob pattern and its risk weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    /// Glob pattern over workspace-relative paths
    pub pattern: String,
    /// Risk weight in [0, 1]
    pub weight: f64,
}

/// Compiled standard table, built once per process.
static STANDARD_TAXONOMY: Lazy<RiskTaxonomy> = Lazy::new(|| {
    let entries = vec![
        TaxonomyEntry { pattern: "security/**".into(), weight: 0.9 },
        TaxonomyEntry { pattern: "auth/**".into(), weight: 0.85 },
        TaxonomyEntry { pattern: "payments/**".into(), weight: 0.8 },
        TaxonomyEntry { pattern: "api/**".into(), weight: 0.65 },
        TaxonomyEntry { pattern: "infra/**".into(), weight: 0.6 },
        TaxonomyEntry { pattern: "docs/**".into(), weight: 0.1 },
        TaxonomyEntry { pattern: "**/*.test.*".into(), weight: 0.2 },
        TaxonomyEntry { pattern: "**/*.spec.*".into(), weight: 0.2 },
    ];
    RiskTaxonomy::new(entries).expect("standard taxonomy must build")
});

/// Path-based risk taxonomy.
///
/// The most specific matching pattern wins; specificity is the length of the
/// literal prefix before the first wildcard, so `security/**` beats `**/*`.
#[derive(Debug, Clone)]
pub struct RiskTaxonomy {
    entries: Vec<TaxonomyEntry>,
    glob_set: GlobSet,
}

impl RiskTaxonomy {
    /// Build a taxonomy from explicit entries.
    pub fn new(entries: Vec<TaxonomyEntry>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for entry in &entries {
            if !(0.0..=1.0).contains(&entry.weight) {
                return Err(OdavlError::validation(format!(
                    "taxonomy weight for '{}' must be in [0, 1], got {}",
                    entry.pattern, entry.weight
                )));
            }
            let glob = Glob::new(&entry.pattern).map_err(|e| {
                OdavlError::config_field(
                    format!("invalid taxonomy pattern '{}': {e}", entry.pattern),
                    "taxonomy",
                )
            })?;
            builder.add(glob);
        }
        let glob_set = builder.build().map_err(|e| {
            OdavlError::config_field(format!("failed to build taxonomy globs: {e}"), "taxonomy")
        })?;

        Ok(Self { entries, glob_set })
    }

    /// The default taxonomy table.
    pub fn standard() -> Self {
        STANDARD_TAXONOMY.clone()
    }

    /// Risk weight for a workspace-relative path.
    pub fn risk_weight(&self, path: &str) -> f64 {
        let normalized = path.replace('\\', "/");
        let matches = self.glob_set.matches(normalized.as_str());
        matches
            .into_iter()
            .max_by_key(|&idx| pattern_specificity(&self.entries[idx].pattern))
            .map(|idx| self.entries[idx].weight)
            .unwrap_or(DEFAULT_RISK_WEIGHT)
    }
}

/// Literal prefix length before the first wildcard character.
fn pattern_specificity(pattern: &str) -> usize {
    pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len())
}

/// Infer an issue category from detector id, rule id, and message keywords.
pub fn infer_category(finding: &Finding) -> IssueCategory {
    let haystack = format!(
        "{} {} {}",
        finding.detector,
        finding.rule_id.as_deref().unwrap_or_default(),
        finding.message
    )
    .to_ascii_lowercase();

    const KEYWORDS: &[(&str, IssueCategory)] = &[
        ("circular", IssueCategory::Circular),
        ("cycle", IssueCategory::Circular),
        ("security", IssueCategory::Security),
        ("credential", IssueCategory::Security),
        ("secret", IssueCategory::Security),
        ("vulnerab", IssueCategory::Security),
        ("sec0", IssueCategory::Security),
        ("import", IssueCategory::Import),
        ("unresolved module", IssueCategory::Import),
        ("performance", IssueCategory::Performance),
        ("perf", IssueCategory::Performance),
        ("network", IssueCategory::Network),
        ("fetch", IssueCategory::Network),
        ("isolation", IssueCategory::Isolation),
        ("boundary", IssueCategory::Isolation),
        ("lockfile", IssueCategory::PackageDrift),
        ("package drift", IssueCategory::PackageDrift),
        ("dependency version", IssueCategory::PackageDrift),
        ("build", IssueCategory::Build),
        ("tsconfig", IssueCategory::Build),
    ];

    for (keyword, category) in KEYWORDS {
        if haystack.contains(keyword) {
            return *category;
        }
    }
    IssueCategory::Syntax
}

/// A finding promoted into a prioritized work item with proposed recipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixCandidate {
    /// Candidate id, derived from the finding fingerprint
    pub id: String,

    /// The underlying finding
    pub finding: Finding,

    /// Risk weight of the affected file, in [0, 1]
    pub risk_weight: f64,

    /// Recipe ids proposed by the registry for this category
    pub potential_recipes: Vec<String>,

    /// Priority in [0, 100], higher first
    pub priority: f64,

    /// Estimated lines of code a fix will change
    pub estimated_loc: u32,
}

/// Priority formula: 0.4·severity + 0.3·category + 0.3·(risk·100).
pub fn calculate_priority(finding: &Finding, risk_weight: f64) -> f64 {
    0.4 * finding.severity.score() + 0.3 * finding.category.score() + 0.3 * (risk_weight * 100.0)
}

/// Intake engine: maps findings to sorted fix candidates.
#[derive(Debug)]
pub struct IntakeEngine {
    taxonomy: RiskTaxonomy,
}

impl IntakeEngine {
    /// Create an engine with the given taxonomy.
    pub fn new(taxonomy: RiskTaxonomy) -> Self {
        Self { taxonomy }
    }

    /// Create an engine with the standard taxonomy table.
    pub fn standard() -> Self {
        Self::new(RiskTaxonomy::standard())
    }

    /// Risk weight lookup for a path.
    pub fn risk_weight(&self, path: &str) -> f64 {
        self.taxonomy.risk_weight(path)
    }

    /// Promote findings to fix candidates, sorted by priority descending.
    ///
    /// Ties break by severity, then risk weight, then lexicographic file
    /// order, so the output is fully deterministic.
    pub fn candidates(
        &self,
        findings: &[Finding],
        registry: &RecipeRegistry,
    ) -> Vec<FixCandidate> {
        let mut candidates: Vec<FixCandidate> = findings
            .iter()
            .map(|raw| {
                let mut finding = raw.clone();
                // Detectors that do not classify report the default
                // category; infer a sharper one from their vocabulary.
                if finding.category == IssueCategory::Syntax {
                    finding.category = infer_category(&finding);
                }

                let risk_weight = self.taxonomy.risk_weight(&finding.file);
                let priority = calculate_priority(&finding, risk_weight);
                FixCandidate {
                    id: format!("cand-{}", generate_fingerprint(&finding)),
                    risk_weight,
                    potential_recipes: registry.recipes_for_category(finding.category),
                    priority,
                    estimated_loc: finding.category.estimated_loc(),
                    finding,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| b.finding.severity.cmp(&a.finding.severity))
                .then_with(|| b.risk_weight.total_cmp(&a.risk_weight))
                .then_with(|| a.finding.normalized_file().cmp(&b.finding.normalized_file()))
        });

        debug!(count = candidates.len(), "intake produced fix candidates");
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::findings::Severity;

    fn finding(file: &str, severity: Severity, category: IssueCategory) -> Finding {
        Finding::new("det", severity, category, file, 1, "msg")
    }

    #[test]
    fn test_taxonomy_standard_weights() {
        let taxonomy = RiskTaxonomy::standard();
        assert_eq!(taxonomy.risk_weight("security/auth.ts"), 0.9);
        assert_eq!(taxonomy.risk_weight("src/app.test.ts"), 0.2);
        assert_eq!(taxonomy.risk_weight("src/app.ts"), DEFAULT_RISK_WEIGHT);
    }

    #[test]
    fn test_taxonomy_most_specific_wins() {
        let taxonomy = RiskTaxonomy::new(vec![
            TaxonomyEntry { pattern: "**/*".into(), weight: 0.3 },
            TaxonomyEntry { pattern: "security/**".into(), weight: 0.9 },
        ])
        .unwrap();
        assert_eq!(taxonomy.risk_weight("security/auth.ts"), 0.9);
    }

    #[test]
    fn test_taxonomy_rejects_bad_weight() {
        let err = RiskTaxonomy::new(vec![TaxonomyEntry {
            pattern: "x/**".into(),
            weight: 1.5,
        }])
        .unwrap_err();
        assert!(matches!(err, OdavlError::Validation { .. }));
    }

    #[test]
    fn test_infer_category_keywords() {
        let circular = Finding::new(
            "madge",
            Severity::Medium,
            IssueCategory::Syntax,
            "src/a.ts",
            1,
            "Circular dependency between a and b",
        );
        assert_eq!(infer_category(&circular), IssueCategory::Circular);

        let security = Finding::new(
            "scanner",
            Severity::High,
            IssueCategory::Syntax,
            "src/a.ts",
            1,
            "hard-coded secret detected",
        );
        assert_eq!(infer_category(&security), IssueCategory::Security);

        let plain = Finding::new(
            "tsc",
            Severity::High,
            IssueCategory::Syntax,
            "src/a.ts",
            1,
            "Unexpected token",
        );
        assert_eq!(infer_category(&plain), IssueCategory::Syntax);
    }

    #[test]
    fn test_priority_formula() {
        let f = finding("security/auth.ts", Severity::Critical, IssueCategory::Security);
        // 0.4*40 + 0.3*100 + 0.3*90 = 16 + 30 + 27 = 73
        let priority = calculate_priority(&f, 0.9);
        assert!((priority - 73.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&priority));
    }

    #[test]
    fn test_candidates_sorted_by_priority() {
        let engine = IntakeEngine::standard();
        let registry = RecipeRegistry::standard();
        let findings = vec![
            finding("src/low.ts", Severity::Low, IssueCategory::Syntax),
            finding("security/hot.ts", Severity::Critical, IssueCategory::Security),
            finding("src/mid.ts", Severity::Medium, IssueCategory::Import),
        ];

        let candidates = engine.candidates(&findings, &registry);

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].finding.file, "security/hot.ts");
        assert!(candidates[0].priority >= candidates[1].priority);
        assert!(candidates[1].priority >= candidates[2].priority);
    }

    #[test]
    fn test_candidate_tiebreak_is_deterministic() {
        let engine = IntakeEngine::standard();
        let registry = RecipeRegistry::standard();
        let findings = vec![
            finding("src/b.ts", Severity::Medium, IssueCategory::Import),
            finding("src/a.ts", Severity::Medium, IssueCategory::Import),
        ];

        let candidates = engine.candidates(&findings, &registry);
        assert_eq!(candidates[0].finding.file, "src/a.ts");
        assert_eq!(candidates[1].finding.file, "src/b.ts");
    }

    #[test]
    fn test_candidates_infer_category_for_unclassified_findings() {
        let engine = IntakeEngine::standard();
        let registry = RecipeRegistry::standard();
        let findings = vec![Finding::new(
            "madge",
            Severity::Medium,
            IssueCategory::Syntax,
            "src/a.ts",
            1,
            "Circular dependency between a and b",
        )];

        let candidates = engine.candidates(&findings, &registry);
        assert_eq!(candidates[0].finding.category, IssueCategory::Circular);
        assert_eq!(
            candidates[0].potential_recipes,
            vec!["break-dependency-cycle".to_string()]
        );
        assert_eq!(candidates[0].estimated_loc, 25);
    }

    #[test]
    fn test_estimated_loc_follows_category() {
        let engine = IntakeEngine::standard();
        let registry = RecipeRegistry::standard();
        let findings = vec![finding("src/a.ts", Severity::Medium, IssueCategory::Circular)];

        let candidates = engine.candidates(&findings, &registry);
        assert_eq!(candidates[0].estimated_loc, 25);
    }
}
