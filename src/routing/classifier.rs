//! Hint complexity classification
//!
//! Pure, deterministic rules deciding whether a text hint describes something
//! a cheap tier can handle ("red shoes") or something that needs the cloud
//! model ("melancholic cyberpunk atmosphere"). The indicator set and the
//! thresholds are tuning parameters.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;

/// Tokens that mark a hint as abstract enough to need the cloud model
static ABSTRACT_INDICATORS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "atmosphere",
        "mood",
        "feeling",
        "reminiscent",
        "style",
        "aesthetic",
        "vibe",
        "essence",
        "context",
        "emotional",
        "abstract",
        "surreal",
    ])
});

/// Complexity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

/// Classification result: a bucket plus a score in `[0, 1]` where 1.0 is
/// most complex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complexity {
    pub level: ComplexityLevel,
    pub score: f64,
}

/// Stateless classifier over whitespace tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a hint. Rules are evaluated in order, first match wins:
    /// empty input is simple, any abstract indicator makes it complex, five
    /// tokens or fewer is simple, everything else is moderate.
    pub fn classify(&self, text: &str) -> Complexity {
        if text.trim().is_empty() {
            return Complexity {
                level: ComplexityLevel::Simple,
                score: 0.0,
            };
        }

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();

        if tokens.iter().any(|t| ABSTRACT_INDICATORS.contains(t)) {
            return Complexity {
                level: ComplexityLevel::Complex,
                score: 0.8,
            };
        }

        if tokens.len() <= 5 {
            return Complexity {
                level: ComplexityLevel::Simple,
                score: 0.2,
            };
        }

        Complexity {
            level: ComplexityLevel::Moderate,
            score: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_is_simple() {
        let c = ComplexityClassifier::new();
        assert_eq!(
            c.classify(""),
            Complexity {
                level: ComplexityLevel::Simple,
                score: 0.0
            }
        );
        assert_eq!(c.classify("   \t ").level, ComplexityLevel::Simple);
        assert_eq!(c.classify("   ").score, 0.0);
    }

    #[test]
    fn test_abstract_terms_are_complex() {
        let c = ComplexityClassifier::new();
        let result = c.classify("a melancholic cyberpunk atmosphere");
        assert_eq!(result.level, ComplexityLevel::Complex);
        assert_eq!(result.score, 0.8);

        // Indicator match is case-insensitive and wins over token count
        assert_eq!(c.classify("Surreal").level, ComplexityLevel::Complex);
    }

    #[test]
    fn test_short_concrete_is_simple() {
        let c = ComplexityClassifier::new();
        let result = c.classify("a red shoe");
        assert_eq!(result.level, ComplexityLevel::Simple);
        assert_eq!(result.score, 0.2);
    }

    #[test]
    fn test_long_concrete_is_moderate() {
        let c = ComplexityClassifier::new();
        let result = c.classify("a man riding a bicycle down a steep cobbled street");
        assert_eq!(result.level, ComplexityLevel::Moderate);
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn test_five_token_boundary() {
        let c = ComplexityClassifier::new();
        assert_eq!(c.classify("one two three four five").level, ComplexityLevel::Simple);
        assert_eq!(
            c.classify("one two three four five six").level,
            ComplexityLevel::Moderate
        );
    }

    proptest! {
        /// Classification is pure: same input, same output, score in range.
        #[test]
        fn prop_deterministic_and_bounded(text in ".{0,120}") {
            let c = ComplexityClassifier::new();
            let a = c.classify(&text);
            let b = c.classify(&text);
            prop_assert_eq!(a, b);
            prop_assert!((0.0..=1.0).contains(&a.score));
        }
    }
}
