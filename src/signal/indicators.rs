//! Technical indicators over a price series (oldest first)
//!
//! Every function returns `None` when the series is too short for a
//! meaningful value.

/// Relative strength index with Wilder smoothing, bounded to 0..=100
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    for change in rest {
        avg_gain = (avg_gain * (period as f64 - 1.0) + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + (-change).max(0.0)) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Exponential moving average seeded with the first sample
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    out.push(first);
    for v in &values[1..] {
        let prev = out[out.len() - 1];
        out.push((v - prev) * k + prev);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Latest MACD line, signal line and histogram
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || signal == 0 || prices.len() < slow + signal {
        return None;
    }
    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);

    let macd = *line.last()?;
    let signal = *signal_line.last()?;
    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    /// Position of `price` inside the channel: 0 at the lower band, 1 at the upper
    pub fn position(&self, price: f64) -> Option<f64> {
        let width = self.upper - self.lower;
        if width <= f64::EPSILON {
            return None;
        }
        Some((price - self.lower) / width)
    }
}

/// Bollinger bands over the trailing `period` samples (population deviation)
pub fn bollinger(prices: &[f64], period: usize, std_dev: f64) -> Option<Bands> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let (mean, std) = mean_std(window)?;
    Some(Bands {
        upper: mean + std_dev * std,
        middle: mean,
        lower: mean - std_dev * std,
    })
}

/// Mean and population standard deviation
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_rsi_bounds() {
        assert_eq!(rsi(&ramp(1.0, 0.1, 30), 14), Some(100.0));
        let falling = ramp(10.0, -0.1, 30);
        assert!(rsi(&falling, 14).unwrap() < 1e-9);
        assert_eq!(rsi(&[5.0; 20], 14), Some(50.0));
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        assert!(rsi(&ramp(1.0, 1.0, 14), 14).is_none());
        assert!(rsi(&ramp(1.0, 1.0, 15), 14).is_some());
    }

    #[test]
    fn test_rsi_mixed_series_is_between() {
        let prices: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -0.5 } + i as f64 * 0.05)
            .collect();
        let value = rsi(&prices, 14).unwrap();
        assert!(value > 0.0 && value < 100.0);
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema(&[10.0, 20.0], 3);
        assert_eq!(out[0], 10.0);
        assert!((out[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let rising = ramp(100.0, 1.0, 40);
        let m = macd(&rising, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0);

        let accelerating: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).powi(2) * 0.05).collect();
        assert!(macd(&accelerating, 12, 26, 9).unwrap().histogram > 0.0);

        assert!(macd(&rising[..30], 12, 26, 9).is_none());
    }

    #[test]
    fn test_bollinger_position() {
        let mut prices = vec![100.0, 102.0, 98.0, 101.0, 99.0];
        prices.extend_from_slice(&[100.0, 102.0, 98.0, 101.0, 99.0]);
        let bands = bollinger(&prices, 10, 2.0).unwrap();
        assert!((bands.middle - 100.0).abs() < 1e-9);
        assert!((bands.position(bands.lower).unwrap()).abs() < 1e-9);
        assert!((bands.position(bands.upper).unwrap() - 1.0).abs() < 1e-9);
        assert!((bands.position(100.0).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_flat_band_has_no_position() {
        let bands = bollinger(&[3.0; 20], 20, 2.0).unwrap();
        assert!(bands.position(3.0).is_none());
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);
        assert!(mean_std(&[]).is_none());
    }
}
