//! Rule-based expression classification.
//!
//! Six candidate scores are computed from a fixed table of channel weights,
//! each clamped to [0, 1]. The highest score wins and ties go to the label
//! declared first. This is a deterministic decision rule, not a model.

use crate::core::channels::Channel;
use crate::core::summary::FeatureVector;
use serde::{Deserialize, Serialize};

/// Discrete expression label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Happy,
    Sad,
    Anger,
    Surprise,
    Disgust,
    Neutral,
}

impl Expression {
    /// All labels in evaluation (tie-break) order.
    pub const ALL: [Expression; 6] = [
        Expression::Happy,
        Expression::Sad,
        Expression::Anger,
        Expression::Surprise,
        Expression::Disgust,
        Expression::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Anger => "anger",
            Expression::Surprise => "surprise",
            Expression::Disgust => "disgust",
            Expression::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Expression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s.trim())
            .ok_or_else(|| format!("unknown expression label: {s}"))
    }
}

/// Winning label and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Expression,
    pub score: f64,
}

/// Additive bonus applied when a channel exceeds a threshold.
struct Boost {
    channel: Channel,
    threshold: f64,
    amount: f64,
}

/// One scoring rule: `bias + Σ weight·channel (+ boost)`, clamped to [0, 1].
struct Rule {
    label: Expression,
    bias: f64,
    terms: &'static [(Channel, f64)],
    boost: Option<Boost>,
}

const RULES: [Rule; 6] = [
    // Smile minus half the furrow, more when the cheeks rise too.
    Rule {
        label: Expression::Happy,
        bias: 0.0,
        terms: &[(Channel::Au12, 1.0), (Channel::Au04, -0.5)],
        boost: Some(Boost {
            channel: Channel::Au06,
            threshold: 0.5,
            amount: 0.2,
        }),
    },
    Rule {
        label: Expression::Sad,
        bias: 0.0,
        terms: &[
            (Channel::Au01, 0.5),
            (Channel::Au04, 0.5),
            (Channel::Au15, 1.0),
            (Channel::Au12, -0.5),
        ],
        boost: None,
    },
    Rule {
        label: Expression::Anger,
        bias: 0.0,
        terms: &[
            (Channel::Au04, 1.0),
            (Channel::Au07, 0.5),
            (Channel::Au12, -0.5),
        ],
        boost: Some(Boost {
            channel: Channel::Au23,
            threshold: 0.5,
            amount: 0.2,
        }),
    },
    Rule {
        label: Expression::Surprise,
        bias: 0.0,
        terms: &[
            (Channel::Au01, 0.5),
            (Channel::Au02, 0.5),
            (Channel::Au26, 1.0),
        ],
        boost: None,
    },
    Rule {
        label: Expression::Disgust,
        bias: 0.0,
        terms: &[
            (Channel::Au09, 1.0),
            (Channel::Au10, 1.0),
            (Channel::Au12, -0.3),
        ],
        boost: None,
    },
    Rule {
        label: Expression::Neutral,
        bias: 1.0,
        terms: &[
            (Channel::Au12, -1.0),
            (Channel::Au04, -1.0),
            (Channel::Au26, -1.0),
        ],
        boost: None,
    },
];

impl Rule {
    fn score(&self, features: &FeatureVector) -> f64 {
        let mut score = self.bias;
        for &(channel, weight) in self.terms {
            score += weight * features.get(channel);
        }
        if let Some(boost) = &self.boost {
            if features.get(boost.channel) > boost.threshold {
                score += boost.amount;
            }
        }
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Every candidate score, in evaluation order.
pub fn candidate_scores(features: &FeatureVector) -> [(Expression, f64); 6] {
    let mut scores = [(Expression::Neutral, 0.0); 6];
    for (slot, rule) in scores.iter_mut().zip(RULES.iter()) {
        *slot = (rule.label, rule.score(features));
    }
    scores
}

/// Pick the label with the highest candidate score.
pub fn classify(features: &FeatureVector) -> Classification {
    let scores = candidate_scores(features);
    let (label, score) = scores
        .iter()
        .skip(1)
        .fold(scores[0], |best, &candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });
    Classification { label, score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channels::CHANNEL_COUNT;
    use proptest::prelude::*;

    #[test]
    fn test_rule_order_matches_label_order() {
        for (rule, label) in RULES.iter().zip(Expression::ALL) {
            assert_eq!(rule.label, label);
        }
    }

    #[test]
    fn test_clear_smile_is_happy() {
        let fv = FeatureVector::from_pairs(&[
            (Channel::Au12, 0.9),
            (Channel::Au04, 0.1),
            (Channel::Au06, 0.8),
            (Channel::Au25, 0.1),
            (Channel::Au26, 0.0),
            (Channel::Au45c, 0.1),
        ]);
        let result = classify(&fv);
        assert_eq!(result.label, Expression::Happy);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_inner_brow_with_furrow_is_sad() {
        // sad = 0.5*(0.5+0.8) + 0.3 - 0.05 = 0.90, anger = 0.8 - 0.05 = 0.75
        let fv = FeatureVector::from_pairs(&[
            (Channel::Au01, 0.5),
            (Channel::Au04, 0.8),
            (Channel::Au12, 0.1),
            (Channel::Au15, 0.3),
            (Channel::Au06, 0.0),
        ]);
        let scores = candidate_scores(&fv);
        assert!((scores[1].1 - 0.9).abs() < 1e-9);
        assert!((scores[2].1 - 0.75).abs() < 1e-9);

        let result = classify(&fv);
        assert_eq!(result.label, Expression::Sad);
        assert!((result.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_lip_tightener_boosts_anger() {
        let fv = FeatureVector::from_pairs(&[
            (Channel::Au04, 0.6),
            (Channel::Au07, 0.4),
            (Channel::Au23, 0.9),
        ]);
        let result = classify(&fv);
        assert_eq!(result.label, Expression::Anger);
        assert!((result.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_jaw_and_raised_brows_is_surprise() {
        let fv = FeatureVector::from_pairs(&[
            (Channel::Au01, 0.8),
            (Channel::Au02, 0.8),
            (Channel::Au26, 0.5),
        ]);
        assert_eq!(classify(&fv).label, Expression::Surprise);
    }

    #[test]
    fn test_nose_wrinkle_is_disgust() {
        let fv = FeatureVector::from_pairs(&[(Channel::Au09, 0.7), (Channel::Au10, 0.6)]);
        assert_eq!(classify(&fv).label, Expression::Disgust);
    }

    #[test]
    fn test_blank_face_is_neutral() {
        let fv = FeatureVector::from_pairs(&[]);
        let result = classify(&fv);
        assert_eq!(result.label, Expression::Neutral);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_ties_go_to_first_declared() {
        // happy = 0.5, neutral = 1 - 0.5 = 0.5
        let fv = FeatureVector::from_pairs(&[(Channel::Au12, 0.5)]);
        let result = classify(&fv);
        assert_eq!(result.label, Expression::Happy);
        assert!((result.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_scores_are_clamped_and_deterministic() {
        let fv = FeatureVector::from_pairs(&[
            (Channel::Au04, 4.0),
            (Channel::Au12, 3.0),
            (Channel::Au26, 5.0),
        ]);
        for (_, score) in candidate_scores(&fv) {
            assert!((0.0..=1.0).contains(&score));
        }
        assert_eq!(classify(&fv), classify(&fv));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("anger".parse::<Expression>().unwrap(), Expression::Anger);
        assert!("fear".parse::<Expression>().is_err());
        assert_eq!(Expression::Surprise.to_string(), "surprise");
    }

    fn channel_value() -> impl Strategy<Value = f64> {
        prop_oneof![
            4 => -2.0f64..2.0,
            1 => -1e9f64..1e9,
            1 => Just(f64::NAN),
        ]
    }

    proptest! {
        #[test]
        fn prop_label_and_score_are_well_formed(
            values in prop::collection::vec(channel_value(), CHANNEL_COUNT),
        ) {
            let mut means = [0.0; CHANNEL_COUNT];
            means.copy_from_slice(&values);
            let fv = FeatureVector::new(means, 10, 6.0);

            let first = classify(&fv);
            prop_assert!(Expression::ALL.contains(&first.label));
            prop_assert!((0.0..=1.0).contains(&first.score));
            prop_assert_eq!(first, classify(&fv));

            // The winner is the first label holding the top score.
            let scores = candidate_scores(&fv);
            let top = scores.iter().map(|s| s.1).fold(f64::MIN, f64::max);
            let winner = scores.iter().find(|s| s.1 == top).map(|s| s.0);
            prop_assert_eq!(Some(first.label), winner);
            prop_assert_eq!(first.score, top);
        }
    }
}
