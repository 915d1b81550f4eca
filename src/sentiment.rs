//! Pluggable sentiment scoring applied to each mention's context excerpt.

use crate::config::SentimentMode;
use crate::types::{Sentiment, SentimentLabel};

pub trait SentimentScorer: Send + Sync {
    /// Scores a context excerpt. None leaves the mention's sentiment columns NULL,
    /// which keeps it out of sentiment averages.
    fn score(&self, context: &str) -> Option<Sentiment>;
}

/// Leaves every mention unscored.
pub struct NoSentiment;

impl SentimentScorer for NoSentiment {
    fn score(&self, _context: &str) -> Option<Sentiment> {
        None
    }
}

const BULLISH: &[&str] = &[
    "bull", "bullish", "buy", "buying", "calls", "long", "moon", "mooning", "rocket", "squeeze",
    "undervalued", "rip", "breakout", "gains", "green", "hold", "hodl", "up",
];

const BEARISH: &[&str] = &[
    "bear", "bearish", "sell", "selling", "puts", "short", "dump", "dumping", "crash", "overvalued",
    "drill", "drilling", "bagholder", "bags", "red", "loss", "losses", "down", "rug",
];

/// Keyword lexicon. Score is (bullish - bearish) / matched, label follows the
/// sign, confidence is the share of words that matched either list.
pub struct LexiconScorer;

impl SentimentScorer for LexiconScorer {
    fn score(&self, context: &str) -> Option<Sentiment> {
        let words: Vec<String> = context
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return None;
        }

        let bull = words.iter().filter(|w| BULLISH.contains(&w.as_str())).count();
        let bear = words.iter().filter(|w| BEARISH.contains(&w.as_str())).count();
        let matched = bull + bear;
        if matched == 0 {
            return Some(Sentiment {
                score: 0.0,
                label: SentimentLabel::Neu,
                confidence: 0.0,
            });
        }

        let score = (bull as f64 - bear as f64) / matched as f64;
        let label = if score > 0.0 {
            SentimentLabel::Pos
        } else if score < 0.0 {
            SentimentLabel::Neg
        } else {
            SentimentLabel::Neu
        };
        Some(Sentiment {
            score,
            label,
            confidence: (matched as f64 / words.len() as f64).min(1.0),
        })
    }
}

pub fn scorer_for(mode: SentimentMode) -> Box<dyn SentimentScorer> {
    match mode {
        SentimentMode::None => Box::new(NoSentiment),
        SentimentMode::Lexicon => Box::new(LexiconScorer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_context() {
        let s = LexiconScorer.score("GME to the moon, buying calls").unwrap();
        assert_eq!(s.label, SentimentLabel::Pos);
        assert!((s.score - 1.0).abs() < 1e-9);
        assert!(s.confidence > 0.0);
    }

    #[test]
    fn mixed_context_is_neutral() {
        let s = LexiconScorer.score("buy the dip or sell the rip? puts").unwrap();
        // buy, rip vs sell, puts
        assert_eq!(s.label, SentimentLabel::Neu);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn bearish_context() {
        let s = LexiconScorer.score("AMC is going to crash, loading puts").unwrap();
        assert_eq!(s.label, SentimentLabel::Neg);
    }

    #[test]
    fn no_sentiment_scores_nothing() {
        assert!(NoSentiment.score("GME to the moon").is_none());
        assert!(LexiconScorer.score("  ").is_none());
    }
}
