//! Relative strength index, Wilder-smoothed, period 11. Binance-only in practice: `rsi1` runs on 1-minute closes, `rsi60`
//! on 60-minute aggregated closes, both fed one close at a time as bars close.

use perp_core::PerpSample;

const PERIOD: usize = 11;

/// Incremental RSI over a stream of closes. Warms up for `PERIOD` samples
/// (simple average of gains/losses), then switches to Wilder smoothing.
#[derive(Debug, Clone)]
pub struct RsiCalculator {
    prev_close: Option<f64>,
    gains: Vec<f64>,
    losses: Vec<f64>,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
}

impl Default for RsiCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl RsiCalculator {
    pub fn new() -> Self {
        Self {
            prev_close: None,
            gains: Vec::with_capacity(PERIOD),
            losses: Vec::with_capacity(PERIOD),
            avg_gain: None,
            avg_loss: None,
        }
    }

    /// Feed the next close, returning the RSI once `PERIOD` deltas have
    /// accumulated, `None` during warm-up.
    pub fn push(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };

        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        match (self.avg_gain, self.avg_loss) {
            (Some(ag), Some(al)) => {
                let ag = (ag * (PERIOD as f64 - 1.0) + gain) / PERIOD as f64;
                let al = (al * (PERIOD as f64 - 1.0) + loss) / PERIOD as f64;
                self.avg_gain = Some(ag);
                self.avg_loss = Some(al);
                Some(rsi_from_averages(ag, al))
            }
            _ => {
                self.gains.push(gain);
                self.losses.push(loss);
                if self.gains.len() < PERIOD {
                    return None;
                }
                let ag = self.gains.iter().sum::<f64>() / PERIOD as f64;
                let al = self.losses.iter().sum::<f64>() / PERIOD as f64;
                self.avg_gain = Some(ag);
                self.avg_loss = Some(al);
                Some(rsi_from_averages(ag, al))
            }
        }
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Fills `rsi1`/`rsi60` on an ascending-`ts` run of same-symbol OHLCV
/// samples, feeding closes through a fresh pair of calculators. `rsi60` only
/// advances on hour boundaries (`ts % 3_600_000 == 0`); the rest of the hour
/// is left untouched rather than interpolated.
pub fn compute_rsi_series(samples: &mut [PerpSample]) {
    let mut rsi1 = RsiCalculator::new();
    let mut rsi60 = RsiCalculator::new();
    for sample in samples.iter_mut() {
        let Some(close) = sample.c else { continue };
        sample.rsi1 = rsi1.push(close);
        if sample.ts % (60 * 60_000) == 0 {
            sample.rsi60 = rsi60.push(close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_returns_none_until_period_elapses() {
        let mut rsi = RsiCalculator::new();
        for i in 0..PERIOD {
            assert_eq!(rsi.push(100.0 + i as f64), None);
        }
        assert!(rsi.push(100.0 + PERIOD as f64).is_some());
    }

    #[test]
    fn all_gains_saturates_to_100() {
        let mut rsi = RsiCalculator::new();
        let mut value = None;
        for i in 0..=PERIOD + 5 {
            value = rsi.push(100.0 + i as f64);
        }
        assert_eq!(value, Some(100.0));
    }

    #[test]
    fn flat_closes_saturates_to_100() {
        let mut rsi = RsiCalculator::new();
        let mut value = None;
        for _ in 0..=PERIOD + 5 {
            value = rsi.push(100.0);
        }
        assert_eq!(value, Some(100.0));
    }

    fn minute_sample(minute_offset: i64, close: f64) -> PerpSample {
        let mut sample = PerpSample::new(
            minute_offset * 60_000,
            "BTC",
            perp_core::Exchange::Binance,
            "bin-ohlcv",
        );
        sample.c = Some(close);
        sample
    }

    #[test]
    fn compute_rsi_series_fills_rsi1_after_warm_up_only() {
        let mut samples: Vec<PerpSample> =
            (0..PERIOD as i64 + 3).map(|i| minute_sample(i, 100.0 + i as f64)).collect();
        compute_rsi_series(&mut samples);
        for s in &samples[..PERIOD] {
            assert_eq!(s.rsi1, None);
        }
        assert!(samples[PERIOD].rsi1.is_some());
    }

    #[test]
    fn compute_rsi_series_only_sets_rsi60_on_hour_boundaries() {
        let mut samples = vec![minute_sample(1, 100.0), minute_sample(60, 101.0)];
        compute_rsi_series(&mut samples);
        assert_eq!(samples[0].rsi60, None, "minute 1 isn't an hour boundary");
        assert_eq!(samples[1].rsi60, None, "still warming up after one hourly sample");
    }
}
