//! Rolling-window primitives over a value series.
//!
//! All functions return one output per input. Positions before the window
//! fills, and windows containing a NaN, are NaN.

/// Percent change from the previous value (`(v[i] / v[i-1] - 1) * 100`).
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        let prev = values[i - 1];
        if prev != 0.0 {
            out[i] = (values[i] / prev - 1.0) * 100.0;
        }
    }
    out
}

fn window_sum(window: &[f64]) -> Option<f64> {
    let mut sum = 0.0;
    for &v in window {
        if v.is_nan() {
            return None;
        }
        sum += v;
    }
    Some(sum)
}

/// Trailing mean over `window` observations.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }

    for i in (window - 1)..n {
        if let Some(sum) = window_sum(&values[i + 1 - window..=i]) {
            out[i] = sum / window as f64;
        }
    }
    out
}

/// Trailing sample standard deviation (divides by `window - 1`).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window < 2 || n < window {
        return out;
    }

    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        let Some(sum) = window_sum(slice) else {
            continue;
        };
        let mean = sum / window as f64;
        let sq: f64 = slice.iter().map(|v| (v - mean) * (v - mean)).sum();
        out[i] = (sq / (window - 1) as f64).sqrt();
    }
    out
}

/// Sum of the last `count` finite values (fewer if the series is shorter).
pub fn trailing_sum(values: &[f64], count: usize) -> f64 {
    let start = values.len().saturating_sub(count);
    values[start..].iter().filter(|v| v.is_finite()).sum()
}
