//! Multi-predictor score fusion with confidence calibration.
//!
//! Up to five predictor signals are combined into one calibrated score.
//! Missing predictors redistribute their weight proportionally across the
//! remaining signals; dynamic adjustments dampen the result when the
//! predictors themselves flag elevated risk. The heuristic signal is always
//! present, so fusion never fails for lack of input.

use serde::{Deserialize, Serialize};

/// Base weight per predictor. Must sum to 1.0.
const NN_WEIGHT: f64 = 0.25;
const LSTM_WEIGHT: f64 = 0.20;
const MTL_WEIGHT: f64 = 0.25;
const BAYESIAN_WEIGHT: f64 = 0.20;
const HEURISTIC_WEIGHT: f64 = 0.10;

/// Bayesian variance above this dampens the bayesian weight by half.
const HIGH_VARIANCE_THRESHOLD: f64 = 0.15;

/// MTL security estimate above this applies a risk penalty.
const HIGH_SECURITY_THRESHOLD: f64 = 0.8;

/// MTL downtime estimate above this dampens the overall score.
const HIGH_DOWNTIME_THRESHOLD: f64 = 0.5;

/// Number of predictor slots used for confidence calibration.
const PREDICTOR_SLOTS: f64 = 5.0;

/// Multi-task learning predictor outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MtlSignals {
    /// Predicted fix success probability
    pub success: f64,
    /// Predicted performance outcome
    pub performance: f64,
    /// Predicted security risk
    pub security: f64,
    /// Predicted downtime risk
    pub downtime: f64,
}

/// Bayesian predictor outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BayesianSignal {
    /// Posterior mean
    pub mean: f64,
    /// Posterior variance
    pub variance: f64,
    /// Lower bound of the credible interval
    pub ci_low: f64,
    /// Upper bound of the credible interval
    pub ci_high: f64,
}

/// Input signals for one fusion evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorInputs {
    /// Neural-net confidence, if available
    pub nn: Option<f64>,
    /// Sequence-model confidence, if available
    pub lstm: Option<f64>,
    /// Multi-task predictor outputs, if available
    pub mtl: Option<MtlSignals>,
    /// Bayesian predictor outputs, if available
    pub bayesian: Option<BayesianSignal>,
    /// Heuristic estimate; always present
    pub heuristic: f64,
}

impl PredictorInputs {
    /// Inputs carrying only the heuristic signal.
    pub fn heuristic_only(heuristic: f64) -> Self {
        Self {
            nn: None,
            lstm: None,
            mtl: None,
            bayesian: None,
            heuristic,
        }
    }

    fn provided_count(&self) -> usize {
        1 + usize::from(self.nn.is_some())
            + usize::from(self.lstm.is_some())
            + usize::from(self.mtl.is_some())
            + usize::from(self.bayesian.is_some())
    }
}

/// Effective (normalized) weight of one predictor in a fusion evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveWeight {
    /// Predictor name
    pub predictor: String,
    /// Normalized weight actually applied
    pub weight: f64,
}

/// Output of one fusion evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    /// Calibrated score in [0, 1]
    pub fusion_score: f64,
    /// Fraction of predictor slots that contributed, in [0, 1]
    pub confidence: f64,
    /// Normalized weights applied per present predictor
    pub weights: Vec<EffectiveWeight>,
    /// Human-readable notes for every dynamic adjustment applied
    pub reasoning: Vec<String>,
}

/// Combine predictor signals into a calibrated fusion score.
///
/// Deterministic: identical inputs produce identical outputs, including the
/// effective weights and reasoning notes.
pub fn fuse(inputs: &PredictorInputs) -> FusionResult {
    let mut reasoning = Vec::new();

    // Present signals with base weights, in fixed order.
    let mut signals: Vec<(&'static str, f64, f64)> = Vec::with_capacity(5);
    if let Some(nn) = inputs.nn {
        signals.push(("nn", nn, NN_WEIGHT));
    }
    if let Some(lstm) = inputs.lstm {
        signals.push(("lstm", lstm, LSTM_WEIGHT));
    }
    if let Some(mtl) = inputs.mtl {
        // Security and downtime feed the dynamic adjustments below, not the
        // base value.
        let value = 0.6 * mtl.success + 0.4 * mtl.performance;
        signals.push(("mtl", value, MTL_WEIGHT));
    }
    if let Some(bayesian) = inputs.bayesian {
        let mut weight = BAYESIAN_WEIGHT;
        if bayesian.variance > HIGH_VARIANCE_THRESHOLD {
            weight *= 0.5;
            reasoning.push("High Bayesian variance".to_string());
        }
        signals.push(("bayesian", bayesian.mean, weight));
    }
    signals.push(("heuristic", inputs.heuristic, HEURISTIC_WEIGHT));

    // Weighted mean over present signals; absent predictors redistribute
    // their weight proportionally through the normalization.
    let weight_sum: f64 = signals.iter().map(|(_, _, w)| w).sum();
    let mut fusion_score: f64 = signals
        .iter()
        .map(|(_, value, weight)| value * weight / weight_sum)
        .sum();

    let weights = signals
        .iter()
        .map(|(name, _, weight)| EffectiveWeight {
            predictor: (*name).to_string(),
            weight: weight / weight_sum,
        })
        .collect();

    if let Some(mtl) = inputs.mtl {
        if mtl.security > HIGH_SECURITY_THRESHOLD {
            let risk_penalty = (mtl.security - 0.6).clamp(0.0, 0.4);
            fusion_score *= 1.0 - risk_penalty;
            reasoning.push("High security risk".to_string());
        }
        if mtl.downtime > HIGH_DOWNTIME_THRESHOLD {
            fusion_score *= 1.0 - 0.5 * mtl.downtime;
            reasoning.push("High downtime risk".to_string());
        }
    }

    FusionResult {
        fusion_score: fusion_score.clamp(0.0, 1.0),
        confidence: inputs.provided_count() as f64 / PREDICTOR_SLOTS,
        weights,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn full_inputs() -> PredictorInputs {
        PredictorInputs {
            nn: Some(0.3),
            lstm: Some(0.4),
            mtl: Some(MtlSignals {
                success: 0.85,
                performance: 0.9,
                security: 0.7,
                downtime: 0.1,
            }),
            bayesian: Some(BayesianSignal {
                mean: 0.35,
                variance: 0.05,
                ci_low: 0.25,
                ci_high: 0.45,
            }),
            heuristic: 0.5,
        }
    }

    #[test]
    fn test_heuristic_only_identity() {
        let result = fuse(&PredictorInputs::heuristic_only(0.5));
        assert_relative_eq!(result.fusion_score, 0.5);
        assert_relative_eq!(result.confidence, 0.2);
        assert!(result.reasoning.is_empty());
    }

    #[test]
    fn test_full_inputs_no_adjustments() {
        let result = fuse(&full_inputs());

        assert!(result.fusion_score > 0.0 && result.fusion_score <= 1.0);
        assert_relative_eq!(result.confidence, 1.0);
        assert!(!result
            .reasoning
            .iter()
            .any(|note| note.contains("variance") || note.contains("security")));
    }

    #[test]
    fn test_determinism() {
        let inputs = full_inputs();
        assert_eq!(fuse(&inputs), fuse(&inputs));
    }

    #[test]
    fn test_weight_redistribution_on_missing_inputs() {
        let inputs = PredictorInputs {
            nn: Some(0.8),
            lstm: None,
            mtl: None,
            bayesian: None,
            heuristic: 0.4,
        };
        let result = fuse(&inputs);

        // nn 0.25 and heuristic 0.10 renormalize to 5/7 and 2/7.
        let expected = (0.25 * 0.8 + 0.10 * 0.4) / 0.35;
        assert_relative_eq!(result.fusion_score, expected, max_relative = 1e-12);
        assert_relative_eq!(result.confidence, 0.4);

        let total: f64 = result.weights.iter().map(|w| w.weight).sum();
        assert_relative_eq!(total, 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_high_variance_dampens_bayesian() {
        let mut inputs = full_inputs();
        inputs.bayesian = Some(BayesianSignal {
            mean: 0.9,
            variance: 0.2,
            ci_low: 0.5,
            ci_high: 1.0,
        });

        let result = fuse(&inputs);
        assert!(result.reasoning.contains(&"High Bayesian variance".to_string()));

        let bayesian_weight = result
            .weights
            .iter()
            .find(|w| w.predictor == "bayesian")
            .unwrap()
            .weight;
        let nn_weight = result
            .weights
            .iter()
            .find(|w| w.predictor == "nn")
            .unwrap()
            .weight;
        // Dampened bayesian (0.10) sits below nn (0.25) after normalization.
        assert!(bayesian_weight < nn_weight);
    }

    #[test]
    fn test_security_penalty() {
        let mut inputs = full_inputs();
        let mut without = inputs;
        inputs.mtl = Some(MtlSignals {
            success: 0.85,
            performance: 0.9,
            security: 0.9,
            downtime: 0.1,
        });
        without.mtl = Some(MtlSignals {
            success: 0.85,
            performance: 0.9,
            security: 0.7,
            downtime: 0.1,
        });

        let penalized = fuse(&inputs);
        let clean = fuse(&without);

        assert!(penalized.reasoning.contains(&"High security risk".to_string()));
        // riskPenalty = clamp(0.9 - 0.6, 0, 0.4) = 0.3
        assert_relative_eq!(
            penalized.fusion_score,
            clean.fusion_score * 0.7,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_downtime_dampening() {
        let mut inputs = full_inputs();
        inputs.mtl = Some(MtlSignals {
            success: 0.85,
            performance: 0.9,
            security: 0.5,
            downtime: 0.8,
        });

        let mut reference = inputs;
        reference.mtl = Some(MtlSignals {
            success: 0.85,
            performance: 0.9,
            security: 0.5,
            downtime: 0.1,
        });

        let dampened = fuse(&inputs);
        let clean = fuse(&reference);

        // Factor 1 - 0.5*0.8 = 0.6.
        assert_relative_eq!(
            dampened.fusion_score,
            clean.fusion_score * 0.6,
            max_relative = 1e-12
        );
        assert!(dampened.reasoning.contains(&"High downtime risk".to_string()));
    }

    #[test]
    fn test_adjustment_order_in_reasoning() {
        let inputs = PredictorInputs {
            nn: None,
            lstm: None,
            mtl: Some(MtlSignals {
                success: 0.9,
                performance: 0.9,
                security: 0.95,
                downtime: 0.9,
            }),
            bayesian: Some(BayesianSignal {
                mean: 0.5,
                variance: 0.3,
                ci_low: 0.1,
                ci_high: 0.9,
            }),
            heuristic: 0.5,
        };

        let result = fuse(&inputs);
        assert_eq!(
            result.reasoning,
            vec![
                "High Bayesian variance".to_string(),
                "High security risk".to_string(),
                "High downtime risk".to_string(),
            ]
        );
    }

    #[test]
    fn test_score_clamped() {
        let result = fuse(&PredictorInputs::heuristic_only(1.0));
        assert!(result.fusion_score <= 1.0);
        let result = fuse(&PredictorInputs::heuristic_only(0.0));
        assert!(result.fusion_score >= 0.0);
    }
}
