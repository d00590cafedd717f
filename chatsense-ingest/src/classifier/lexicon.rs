//! Word-list sentiment classifier
//!
//! Deterministic stand-in for a trained model so the service runs without an
//! inference runtime. Counts positive and negative chat vocabulary (emote
//! names included) and ranks the three categories by smoothed share.

use super::{Classifier, ClassifierError, ScoredLabel};
use std::collections::HashSet;

const POSITIVE_WORDS: &[&str] = &[
    "love", "loved", "great", "good", "nice", "awesome", "amazing", "gg", "pog", "pogchamp",
    "poggers", "lol", "lmao", "haha", "best", "hype", "clutch", "win", "wow", "based", "cool",
    "thanks", "thank", "fun", "beautiful", "happy", "goat", "w", "insane", "letsgo", "kappa",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "bad", "terrible", "awful", "worst", "trash", "boring", "sad", "cringe", "lose",
    "lost", "throw", "throwing", "angry", "annoying", "ugly", "mid", "l", "sucks", "stupid",
    "residentsleeper", "biblethump", "notlikethis", "wtf", "dead", "unlucky",
];

/// Smoothing added to every category
const SMOOTHING: f64 = 0.1;
/// Neutral weight when positive and negative evidence balance
const BALANCED_NEUTRAL_WEIGHT: f64 = 1.0;
/// Neutral baseline otherwise
const NEUTRAL_BASELINE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl LexiconClassifier {
    pub fn new() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
        }
    }

    fn counts(&self, text: &str) -> (usize, usize) {
        let lowered = text.to_lowercase();
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .fold((0, 0), |(pos, neg), token| {
                if self.positive.contains(token) {
                    (pos + 1, neg)
                } else if self.negative.contains(token) {
                    (pos, neg + 1)
                } else {
                    (pos, neg)
                }
            })
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LexiconClassifier {
    fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
        let (pos, neg) = self.counts(text);

        let positive = pos as f64 + SMOOTHING;
        let negative = neg as f64 + SMOOTHING;
        let neutral = if pos == neg {
            NEUTRAL_BASELINE + BALANCED_NEUTRAL_WEIGHT
        } else {
            NEUTRAL_BASELINE
        };
        let total = positive + negative + neutral;

        let mut ranked = vec![
            ScoredLabel::new("Positive", positive / total),
            ScoredLabel::new("Neutral", neutral / total),
            ScoredLabel::new("Negative", negative / total),
        ];
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }

    fn name(&self) -> &str {
        "lexicon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::top_ranked;
    use chatsense_common::SentimentLabel;

    fn top(text: &str) -> (SentimentLabel, f64) {
        let ranked = LexiconClassifier::new().classify(text).unwrap();
        top_ranked(&ranked).unwrap()
    }

    #[test]
    fn test_positive_chat() {
        let (label, score) = top("GG that was amazing PogChamp");
        assert_eq!(label, SentimentLabel::Positive);
        assert!(score > 0.5);
    }

    #[test]
    fn test_negative_chat() {
        let (label, _) = top("this is so boring ResidentSleeper");
        assert_eq!(label, SentimentLabel::Negative);
    }

    #[test]
    fn test_plain_text_is_neutral() {
        let (label, _) = top("what time does the stream end");
        assert_eq!(label, SentimentLabel::Neutral);
    }

    #[test]
    fn test_scores_form_distribution() {
        let ranked = LexiconClassifier::new().classify("love it but the ending was bad").unwrap();
        let sum: f64 = ranked.iter().map(|s| s.score).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
