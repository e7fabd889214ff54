//! RSI and MACD.

use super::trend::{ema, ewm, finite};

/// Relative Strength Index with Wilder smoothing (`alpha = 1 / window`).
///
/// Gains and losses are smoothed from the first price change; the first
/// value appears once `window` changes exist. A window with no losses reads
/// 100, no gains reads 0 and no movement at all reads 50.
pub fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut gains = vec![None; closes.len()];
    let mut losses = vec![None; closes.len()];
    for index in 1..closes.len() {
        let change = closes[index] - closes[index - 1];
        gains[index] = Some(change.max(0.0));
        losses[index] = Some((-change).max(0.0));
    }

    let alpha = 1.0 / window.max(1) as f64;
    let avg_gain = ewm(&gains, alpha, window);
    let avg_loss = ewm(&losses, alpha, window);

    avg_gain
        .into_iter()
        .zip(avg_loss)
        .map(|(gain, loss)| match (gain?, loss?) {
            (gain, loss) if loss == 0.0 && gain == 0.0 => Some(50.0),
            (_, loss) if loss == 0.0 => Some(100.0),
            (gain, loss) => finite(100.0 - 100.0 / (1.0 + gain / loss)),
        })
        .collect()
}

/// MACD line, signal and histogram, one slot per close.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// `line = ema(fast) - ema(slow)`, `signal = ema(line, signal_window)`.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_window: usize) -> MacdSeries {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(fast, slow)| finite((*fast)? - (*slow)?))
        .collect();
    let signal = ewm(&line, 2.0 / (signal_window as f64 + 1.0), signal_window);
    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(line, signal)| finite((*line)? - (*signal)?))
        .collect();

    MacdSeries {
        line,
        signal,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::assert_approx;

    #[test]
    fn rsi_of_steady_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|step| 100.0 + f64::from(step)).collect();
        let result = rsi(&closes, 14);

        assert_eq!(result[13], None);
        assert_approx(result[14].expect("rsi"), 100.0);
        assert_approx(result[19].expect("rsi"), 100.0);
    }

    #[test]
    fn rsi_of_steady_losses_is_0() {
        let closes: Vec<f64> = (0..20).map(|step| 100.0 - f64::from(step)).collect();
        assert_approx(rsi(&closes, 14)[15].expect("rsi"), 0.0);
    }

    #[test]
    fn rsi_of_flat_prices_is_neutral() {
        assert_approx(rsi(&[10.0; 16], 14)[15].expect("rsi"), 50.0);
    }

    #[test]
    fn rsi_uses_wilder_smoothing() {
        // window 2, alpha 0.5: gains 1,0,2 -> 1, 0.5, 1.25; losses 0,1,0 -> 0, 0.5, 0.25
        let result = rsi(&[10.0, 11.0, 10.0, 12.0], 2);

        assert_approx(result[2].expect("rsi"), 50.0);
        assert_approx(result[3].expect("rsi"), 100.0 - 100.0 / (1.0 + 1.25 / 0.25));
    }

    #[test]
    fn rsi_stays_within_bounds() {
        let closes: Vec<f64> = (0..120)
            .map(|step| 50.0 + (f64::from(step) * 0.7).sin() * 5.0)
            .collect();
        for value in rsi(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value), "rsi out of range: {value}");
        }
    }

    #[test]
    fn macd_signal_lags_the_line() {
        let closes: Vec<f64> = (0..60).map(|step| 100.0 + f64::from(step) * 0.5).collect();
        let series = macd(&closes, 12, 26, 9);

        assert_eq!(series.line[24], None);
        assert!(series.line[25].is_some());
        assert_eq!(series.signal[32], None);
        assert!(series.signal[33].is_some());
        let histogram = series.histogram[40].expect("histogram");
        assert_approx(
            histogram,
            series.line[40].expect("line") - series.signal[40].expect("signal"),
        );
    }
}
