//! Bounded price history used by polling strategies

use std::collections::VecDeque;

use crate::signal::indicators::mean_std;

#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl PriceHistory {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn push(&mut self, price: f64) {
        self.samples.push_back(price);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first
    pub fn prices(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn high(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    /// Standard deviation of step returns, as a fraction
    pub fn volatility(&self) -> f64 {
        let returns: Vec<f64> = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter(|(prev, _)| **prev > 0.0)
            .map(|(prev, next)| (next - prev) / prev)
            .collect();
        mean_std(&returns).map_or(0.0, |(_, std)| std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_bounded() {
        let mut history = PriceHistory::new(3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            history.push(p);
        }
        assert_eq!(history.prices(), vec![2.0, 3.0, 4.0]);
        assert_eq!(history.high(), Some(4.0));
        assert_eq!(history.latest(), Some(4.0));
    }

    #[test]
    fn test_volatility() {
        let mut flat = PriceHistory::new(10);
        for _ in 0..5 {
            flat.push(1.0);
        }
        assert_eq!(flat.volatility(), 0.0);

        let mut choppy = PriceHistory::new(10);
        for p in [1.0, 1.2, 0.9, 1.3, 0.8] {
            choppy.push(p);
        }
        assert!(choppy.volatility() > 0.1);
        assert_eq!(PriceHistory::new(4).volatility(), 0.0);
    }
}
