//! Bollinger bands, average true range and rolling standard deviation.

use super::trend::{finite, sma};

/// Standard deviation of each trailing `window`, with `ddof` degrees of
/// freedom removed from the divisor.
pub fn rolling_std(values: &[f64], window: usize, ddof: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if window == 0 || window <= ddof || values.len() < window {
        return result;
    }

    for end in window..=values.len() {
        let slice = &values[end - window..end];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let squares: f64 = slice.iter().map(|value| (value - mean).powi(2)).sum();
        result[end - 1] = finite((squares / (window - ddof) as f64).sqrt());
    }
    result
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// `middle = sma(window)`, bands at `middle ± std_devs * σ` with the
/// population deviation.
pub fn bollinger(closes: &[f64], window: usize, std_devs: f64) -> BollingerSeries {
    let middle = sma(closes, window);
    let deviation = rolling_std(closes, window, 0);

    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&deviation)
            .map(|(middle, deviation)| finite((*middle)? + sign * std_devs * (*deviation)?))
            .collect()
    };
    let upper = band(1.0);
    let lower = band(-1.0);

    BollingerSeries {
        upper,
        middle,
        lower,
    }
}

/// Average true range with Wilder smoothing, seeded by the mean of the first
/// `window` true ranges. The first bar's true range is its high-low span.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let len = closes.len().min(highs.len()).min(lows.len());
    let mut result = vec![None; len];
    if window == 0 || len < window {
        return result;
    }

    let true_range: Vec<f64> = (0..len)
        .map(|index| {
            let span = highs[index] - lows[index];
            if index == 0 {
                return span;
            }
            let previous = closes[index - 1];
            span.max((highs[index] - previous).abs())
                .max((lows[index] - previous).abs())
        })
        .collect();

    let mut average = true_range[..window].iter().sum::<f64>() / window as f64;
    result[window - 1] = finite(average);
    for index in window..len {
        average = (average * (window - 1) as f64 + true_range[index]) / window as f64;
        result[index] = finite(average);
    }
    result
}
