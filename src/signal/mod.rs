//! Signal engine
//!
//! Three indicators vote Buy, Sell or abstain: RSI against oversold and
//! overbought levels, the MACD histogram against a symmetric threshold, and
//! the price position inside the Bollinger channel. A decision needs at least
//! two of three votes on the same side.

pub mod indicators;

use serde::Serialize;

use crate::config::SignalConfig;

/// Two votes out of three, as a percentage
pub const MIN_DECISION_CONFIDENCE: f64 = 200.0 / 3.0;

const TOTAL_INDICATORS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vote {
    Buy,
    Sell,
    Abstain,
}

/// One indicator's vote with a human-readable label
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorVote {
    pub vote: Vote,
    pub label: String,
}

impl IndicatorVote {
    fn abstain(label: impl Into<String>) -> Self {
        Self {
            vote: Vote::Abstain,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub direction: Direction,
    /// 0..=100
    pub confidence: f64,
    pub buy_votes: usize,
    pub sell_votes: usize,
    /// Labels of the indicators that cast a vote
    pub indicators: Vec<String>,
}

impl Signal {
    pub fn should_buy(&self) -> bool {
        self.direction == Direction::Buy
    }

    pub fn should_sell(&self) -> bool {
        self.direction == Direction::Sell
    }
}

/// Combine indicator votes into a signal. Ties never produce a decision.
pub fn combine(votes: &[IndicatorVote]) -> Signal {
    let buy_votes = votes.iter().filter(|v| v.vote == Vote::Buy).count();
    let sell_votes = votes.iter().filter(|v| v.vote == Vote::Sell).count();
    let confidence = buy_votes.max(sell_votes) as f64 / TOTAL_INDICATORS * 100.0;
    let decisive = confidence + 1e-9 >= MIN_DECISION_CONFIDENCE;

    let direction = if buy_votes > sell_votes && decisive {
        Direction::Buy
    } else if sell_votes > buy_votes && decisive {
        Direction::Sell
    } else {
        Direction::Hold
    };

    Signal {
        direction,
        confidence,
        buy_votes,
        sell_votes,
        indicators: votes
            .iter()
            .filter(|v| v.vote != Vote::Abstain)
            .map(|v| v.label.clone())
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Samples needed before every indicator can vote
    pub fn warmup_len(&self) -> usize {
        let c = &self.config;
        (c.rsi_period + 1)
            .max(c.macd_slow + c.macd_signal)
            .max(c.bb_period)
    }

    pub fn rsi_vote(&self, prices: &[f64]) -> IndicatorVote {
        match indicators::rsi(prices, self.config.rsi_period) {
            Some(value) if value < self.config.oversold => IndicatorVote {
                vote: Vote::Buy,
                label: format!("RSI oversold ({:.2})", value),
            },
            Some(value) if value > self.config.overbought => IndicatorVote {
                vote: Vote::Sell,
                label: format!("RSI overbought ({:.2})", value),
            },
            Some(value) => IndicatorVote::abstain(format!("RSI neutral ({:.2})", value)),
            None => IndicatorVote::abstain("RSI insufficient history"),
        }
    }

    pub fn macd_vote(&self, prices: &[f64]) -> IndicatorVote {
        let c = &self.config;
        match indicators::macd(prices, c.macd_fast, c.macd_slow, c.macd_signal) {
            Some(m) if m.histogram > c.macd_threshold => IndicatorVote {
                vote: Vote::Buy,
                label: format!("MACD bullish ({:.4})", m.histogram),
            },
            Some(m) if m.histogram < -c.macd_threshold => IndicatorVote {
                vote: Vote::Sell,
                label: format!("MACD bearish ({:.4})", m.histogram),
            },
            Some(m) => IndicatorVote::abstain(format!("MACD flat ({:.4})", m.histogram)),
            None => IndicatorVote::abstain("MACD insufficient history"),
        }
    }

    pub fn band_vote(&self, prices: &[f64]) -> IndicatorVote {
        let c = &self.config;
        let position = prices.last().and_then(|&price| {
            indicators::bollinger(prices, c.bb_period, c.bb_std_dev)
                .and_then(|bands| bands.position(price))
        });
        match position {
            Some(p) if p < c.band_threshold => IndicatorVote {
                vote: Vote::Buy,
                label: "Price near lower Bollinger band".to_string(),
            },
            Some(p) if p > 1.0 - c.band_threshold => IndicatorVote {
                vote: Vote::Sell,
                label: "Price near upper Bollinger band".to_string(),
            },
            Some(p) => IndicatorVote::abstain(format!("Band position {:.2}", p)),
            None => IndicatorVote::abstain("Bollinger band unavailable"),
        }
    }

    /// Evaluate a price history, oldest first
    pub fn evaluate(&self, prices: &[f64]) -> Signal {
        combine(&[
            self.rsi_vote(prices),
            self.macd_vote(prices),
            self.band_vote(prices),
        ])
    }
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(v: Vote) -> IndicatorVote {
        IndicatorVote {
            vote: v,
            label: format!("{:?}", v),
        }
    }

    #[test]
    fn test_unanimous_buy() {
        let signal = combine(&[vote(Vote::Buy), vote(Vote::Buy), vote(Vote::Buy)]);
        assert_eq!(signal.confidence, 100.0);
        assert!(signal.should_buy());
        assert_eq!(signal.indicators.len(), 3);
    }

    #[test]
    fn test_split_vote_with_abstain_is_hold() {
        let signal = combine(&[vote(Vote::Buy), vote(Vote::Sell), vote(Vote::Abstain)]);
        assert!((signal.confidence - 33.3).abs() < 0.05);
        assert_eq!(signal.direction, Direction::Hold);
        assert!(!signal.should_buy());
        assert!(!signal.should_sell());
    }

    #[test]
    fn test_two_of_three_decides() {
        let signal = combine(&[vote(Vote::Sell), vote(Vote::Sell), vote(Vote::Abstain)]);
        assert!(signal.should_sell());
        assert!((signal.confidence - 66.67).abs() < 0.01);

        let signal = combine(&[vote(Vote::Buy), vote(Vote::Buy), vote(Vote::Sell)]);
        assert!(signal.should_buy());
    }

    #[test]
    fn test_single_vote_is_not_enough() {
        let signal = combine(&[vote(Vote::Buy), vote(Vote::Abstain), vote(Vote::Abstain)]);
        assert_eq!(signal.direction, Direction::Hold);
    }

    #[test]
    fn test_short_history_abstains() {
        let engine = SignalEngine::default();
        let signal = engine.evaluate(&[1.0, 1.1, 1.2]);
        assert_eq!(signal.direction, Direction::Hold);
        assert_eq!(signal.buy_votes + signal.sell_votes, 0);
    }

    #[test]
    fn test_sustained_rally_votes_sell_on_rsi_and_band() {
        let engine = SignalEngine::default();
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + (i % 3) as f64 * 0.1).collect();
        prices.extend((1..=12).map(|i| 100.0 + i as f64 * 2.0));
        assert_eq!(engine.rsi_vote(&prices).vote, Vote::Sell);
        assert_eq!(engine.band_vote(&prices).vote, Vote::Sell);
        assert!(engine.evaluate(&prices).should_sell());
    }

    #[test]
    fn test_warmup_len_defaults() {
        assert_eq!(SignalEngine::default().warmup_len(), 35);
    }
}
