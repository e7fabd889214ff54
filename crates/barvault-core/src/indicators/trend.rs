//! Simple and exponential moving averages.
//!
//! Both return one slot per input value; a slot is `None` until `window`
//! values have been seen.

/// Keeps finite values only.
pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Rolling mean over `window` values.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return result;
    }

    let mut sum: f64 = values[..window].iter().sum();
    result[window - 1] = finite(sum / window as f64);
    for index in window..values.len() {
        sum += values[index] - values[index - window];
        result[index] = finite(sum / window as f64);
    }
    result
}

/// Exponential average with `alpha = 2 / (window + 1)`, unadjusted, seeded
/// by the first value.
pub fn ema(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let present: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
    ewm(&present, 2.0 / (window as f64 + 1.0), window)
}

/// Unadjusted exponentially weighted mean over a series with leading gaps.
///
/// The recursion is seeded by the first present value. Output is withheld
/// until `min_periods` present values have been folded in.
pub(crate) fn ewm(values: &[Option<f64>], alpha: f64, min_periods: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if min_periods == 0 {
        return result;
    }

    let mut state: Option<f64> = None;
    let mut seen = 0_usize;
    for (index, value) in values.iter().enumerate() {
        let Some(value) = value else {
            continue;
        };
        let next = match state {
            Some(previous) => alpha * value + (1.0 - alpha) * previous,
            None => *value,
        };
        state = Some(next);
        seen += 1;
        if seen >= min_periods {
            result[index] = finite(next);
        }
    }
    result
}
