//! Robust reductions over latency samples.

use serde::Serializer;

use std::time::Duration;

/// Median of `data`, or `None` if it is empty.
///
/// Uses `select_nth_unstable` so the slice is partially reordered. Even
/// counts return the mean of the two middle values.
pub fn median(data: &mut [Duration]) -> Option<Duration> {
    let n = data.len();
    if n == 0 {
        return None;
    }

    let mid = n / 2;
    let (lower, &mut upper_mid, _) = data.select_nth_unstable(mid);
    if n % 2 == 1 {
        return Some(upper_mid);
    }
    // The lower half is unordered, but its maximum is the lower middle value.
    let lower_mid = lower.iter().copied().max()?;
    Some((lower_mid + upper_mid) / 2)
}

/// How far `top` leads `second`, as a fraction of `top`.
pub fn relative_margin(top: Duration, second: Duration) -> f64 {
    let top = top.as_secs_f64();
    if top <= 0.0 {
        return 0.0;
    }
    (top - second.as_secs_f64()) / top
}

pub(crate) fn serialize_secs<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&v| Duration::from_millis(v)).collect()
    }

    #[rstest]
    #[case(&[7], 7)]
    #[case(&[3, 1, 2], 2)]
    #[case(&[4, 1, 3, 2], 2500)]
    #[case(&[5, 5, 5, 5], 5000)]
    fn median_returns_middle_value(#[case] values: &[u64], #[case] expected_micros: u64) {
        let mut data = millis(values);
        let expected = if values.len() % 2 == 1 {
            Duration::from_millis(expected_micros)
        } else {
            Duration::from_micros(expected_micros)
        };

        assert_eq!(median(&mut data), Some(expected));
    }

    #[test]
    fn median_of_nothing_is_none() {
        assert_eq!(median(&mut []), None);
    }

    #[rstest]
    #[case(5)]
    #[case(6)]
    #[case(9)]
    fn median_ignores_single_large_outlier(#[case] n: usize) {
        let mut clean = vec![Duration::from_millis(10); n];
        let mut noisy = clean.clone();
        noisy[n / 3] = Duration::from_millis(100);

        assert_eq!(median(&mut noisy), median(&mut clean));
    }

    #[test]
    fn relative_margin_is_fraction_of_leader() {
        let margin = relative_margin(Duration::from_millis(10), Duration::from_millis(8));

        assert!((margin - 0.2).abs() < 1e-9);
        assert_eq!(relative_margin(Duration::ZERO, Duration::ZERO), 0.0);
    }
}
