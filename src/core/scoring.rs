//! Recipe scoring: ML confidence, trust, and fusion combined into one
//! decision signal per recipe.
//!
//! The scorer is deliberately conservative when signals are missing: an
//! absent ML predictor degrades to a heuristic tapered by the recipe's
//! historic failure count, and the final score always blends fusion output
//! with learned trust.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::Result;
use crate::core::fusion::{fuse, BayesianSignal, MtlSignals, PredictorInputs};
use crate::core::intake::FixCandidate;
use crate::core::recipes::{Recipe, RecipeRegistry};
use crate::core::trust::TrustStore;

/// Weight of the fusion score in the final blend.
const FUSION_BLEND: f64 = 0.6;

/// Weight of the trust score in the final blend.
const TRUST_BLEND: f64 = 0.4;

/// Heuristic ML baseline for recipes the predictor cannot score.
const HEURISTIC_BASE: f64 = 0.5;

/// Heuristic penalty per historic failure.
const HEURISTIC_FAILURE_TAPER: f64 = 0.05;

/// Heuristic floor.
const HEURISTIC_FLOOR: f64 = 0.2;

/// Ordinal safety classification of a scored recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyClass {
    /// Eligible for automated execution
    Safe,
    /// Needs review before automated execution
    Review,
    /// Not eligible for automated execution
    Unsafe,
}

impl SafetyClass {
    /// Classification rule over final score and trust.
    pub fn classify(final_score: f64, trust: f64) -> Self {
        if final_score >= 0.8 && trust >= 0.7 {
            Self::Safe
        } else if final_score < 0.4 || trust < 0.3 {
            Self::Unsafe
        } else {
            Self::Review
        }
    }
}

/// Rich predictor signals an ML backend may supply for fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictorSignals {
    /// Neural-net confidence
    pub nn: Option<f64>,
    /// Sequence-model confidence
    pub lstm: Option<f64>,
    /// Multi-task predictor outputs
    pub mtl: Option<MtlSignals>,
    /// Bayesian predictor outputs
    pub bayesian: Option<BayesianSignal>,
}

/// Pluggable ML predictor capability.
pub trait MlPredictor: Send + Sync {
    /// Scalar confidence for applying `recipe_id` to `candidate`, when the
    /// model can score it.
    fn confidence(&self, recipe_id: &str, candidate: &FixCandidate) -> Option<f64>;

    /// Rich signals for fusion. Defaults to none.
    fn signals(&self, _recipe_id: &str, _candidate: &FixCandidate) -> PredictorSignals {
        PredictorSignals::default()
    }
}

/// Score breakdown for one recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeScore {
    /// Scored recipe id
    pub recipe_id: String,
    /// ML confidence in [0, 1]
    pub ml_score: f64,
    /// Learned trust in [0.1, 1.0]
    pub trust_score: f64,
    /// Fusion engine output in [0, 1]
    pub fusion_score: f64,
    /// Final blended score: 0.6·fusion + 0.4·trust
    pub final_score: f64,
    /// Safety classification
    pub safety_class: SafetyClass,
    /// Human-readable scoring notes
    pub justification: Vec<String>,
}

/// Estimated blast radius of a selected recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedImpact {
    /// Distinct files the recipe will touch
    pub files_affected: usize,
    /// Estimated lines changed
    pub loc_changed: u32,
    /// Aggregate risk reduction estimate
    pub risk_reduction: f64,
}

/// A recipe selected for execution, with its score and target binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedRecipe {
    /// Recipe id
    pub recipe_id: String,
    /// Score breakdown
    pub score: RecipeScore,
    /// Candidate ids this recipe targets
    pub target_candidates: Vec<String>,
    /// Estimated impact
    pub estimated_impact: EstimatedImpact,
    /// Instantiated recipe bound to concrete files
    pub recipe: Recipe,
    /// Explicit dependencies on other selected recipes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Threshold knobs for CI tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringFilter {
    /// Minimum ML confidence
    pub min_ml_score: f64,
    /// Minimum trust
    pub min_trust_score: f64,
    /// Minimum fusion score
    pub min_fusion_score: f64,
    /// Maximum recipes returned per session
    pub max_recipes: usize,
}

impl Default for ScoringFilter {
    fn default() -> Self {
        Self {
            min_ml_score: 0.0,
            min_trust_score: 0.0,
            min_fusion_score: 0.0,
            max_recipes: 5,
        }
    }
}

/// Scorer combining the pluggable predictor, the trust store, and fusion.
pub struct RecipeScorer {
    trust: Arc<TrustStore>,
    predictor: Option<Arc<dyn MlPredictor>>,
    filter: ScoringFilter,
}

impl RecipeScorer {
    /// Create a scorer without an ML backend (heuristic only).
    pub fn new(trust: Arc<TrustStore>, filter: ScoringFilter) -> Self {
        Self {
            trust,
            predictor: None,
            filter,
        }
    }

    /// Attach a pluggable ML predictor.
    pub fn with_predictor(mut self, predictor: Arc<dyn MlPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Conservative ML fallback: base 0.5, tapered by historic failures.
    fn heuristic_ml_score(&self, recipe_id: &str) -> f64 {
        let failures = self.trust.failure_count(recipe_id) as f64;
        (HEURISTIC_BASE - HEURISTIC_FAILURE_TAPER * failures).max(HEURISTIC_FLOOR)
    }

    /// Produce the score breakdown for one recipe applied to one candidate.
    pub fn score_recipe(&self, recipe_id: &str, candidate: &FixCandidate) -> RecipeScore {
        let heuristic = self.heuristic_ml_score(recipe_id);
        let ml_score = self
            .predictor
            .as_ref()
            .and_then(|p| p.confidence(recipe_id, candidate))
            .unwrap_or(heuristic)
            .clamp(0.0, 1.0);

        let signals = self
            .predictor
            .as_ref()
            .map(|p| p.signals(recipe_id, candidate))
            .unwrap_or_default();

        let fusion = fuse(&PredictorInputs {
            nn: signals.nn,
            lstm: signals.lstm,
            mtl: signals.mtl,
            bayesian: signals.bayesian,
            heuristic: ml_score,
        });

        let trust_score = self.trust.trust_for(recipe_id);
        let final_score = FUSION_BLEND * fusion.fusion_score + TRUST_BLEND * trust_score;
        let safety_class = SafetyClass::classify(final_score, trust_score);

        let mut justification = vec![
            format!(
                "fusion {:.3} at confidence {:.1}",
                fusion.fusion_score, fusion.confidence
            ),
            format!("trust {trust_score:.3}"),
        ];
        justification.extend(fusion.reasoning);

        RecipeScore {
            recipe_id: recipe_id.to_string(),
            ml_score,
            trust_score,
            fusion_score: fusion.fusion_score,
            final_score,
            safety_class,
            justification,
        }
    }

    /// Select and bind recipes for a set of candidates.
    ///
    /// Candidates proposing the same recipe are grouped under one selection;
    /// the highest-priority candidate provides the scoring context. Recipes
    /// below any threshold are dropped, the rest are ordered by final score
    /// (recipe id as a stable tie-break) and capped at `max_recipes`.
    pub fn select(
        &self,
        candidates: &[FixCandidate],
        registry: &RecipeRegistry,
    ) -> Result<Vec<SelectedRecipe>> {
        // Group targets per recipe, preserving candidate priority order.
        let mut grouped: Vec<(String, Vec<&FixCandidate>)> = Vec::new();
        for candidate in candidates {
            for recipe_id in &candidate.potential_recipes {
                match grouped.iter_mut().find(|entry| &entry.0 == recipe_id) {
                    Some(entry) => entry.1.push(candidate),
                    None => grouped.push((recipe_id.clone(), vec![candidate])),
                }
            }
        }

        let mut selected = Vec::new();
        for (recipe_id, targets) in grouped {
            let lead = targets[0];
            let score = self.score_recipe(&recipe_id, lead);

            if score.ml_score < self.filter.min_ml_score
                || score.trust_score < self.filter.min_trust_score
                || score.fusion_score < self.filter.min_fusion_score
            {
                debug!(recipe = %recipe_id, "recipe below scoring thresholds");
                continue;
            }

            let files: BTreeSet<String> = targets
                .iter()
                .map(|candidate| candidate.finding.normalized_file())
                .collect();
            let loc_changed: u32 = targets.iter().map(|c| c.estimated_loc).sum();
            let risk_reduction: f64 = targets
                .iter()
                .map(|c| c.risk_weight * c.finding.severity.score() / 100.0)
                .sum();

            let file_list: Vec<String> = files.iter().cloned().collect();
            let recipe = registry.instantiate(&recipe_id, file_list)?;

            selected.push(SelectedRecipe {
                recipe_id: recipe_id.clone(),
                estimated_impact: EstimatedImpact {
                    files_affected: files.len(),
                    loc_changed,
                    risk_reduction,
                },
                target_candidates: targets.iter().map(|c| c.id.clone()).collect(),
                recipe,
                depends_on: Vec::new(),
                score,
            });
        }

        selected.sort_by(|a, b| {
            b.score
                .final_score
                .total_cmp(&a.score.final_score)
                .then_with(|| a.recipe_id.cmp(&b.recipe_id))
        });
        selected.truncate(self.filter.max_recipes);

        Ok(selected)
    }
}
