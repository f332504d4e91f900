//! Descriptive statistics over raw `f64` samples.
//!
//! All functions return 0 for an empty input.

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let (sum, squares) = values
        .iter()
        .fold((0.0, 0.0), |(s, q), v| (s + v, q + v * v));

    let avg = sum / n;
    // Rounding can push the variance a hair below zero for constant input.
    (squares / n - avg * avg).max(0.0).sqrt()
}

/// Geometric mean of the strictly positive values.
pub fn geometric_mean(values: &[f64]) -> f64 {
    let mut product = 1.0;
    let mut count = 0u64;
    for &v in values.iter().filter(|v| **v > 0.0) {
        product *= v;
        count += 1;
    }

    if count > 0 {
        product.powf(1.0 / count as f64)
    } else {
        0.0
    }
}

/// Root mean square.
pub fn quadratic_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sum: f64 = values.iter().map(|v| v * v).sum();
    (sum / values.len() as f64).sqrt()
}

/// Harmonic mean of the strictly positive values.
pub fn harmonic_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u64;
    for &v in values.iter().filter(|v| **v > 0.0) {
        sum += 1.0 / v;
        count += 1;
    }

    if count > 0 {
        count as f64 / sum
    } else {
        0.0
    }
}

/// Nearest-rank percentile of an ascending slice: `sorted[n * p / 100]`.
pub fn nearest_rank<T: Copy>(sorted: &[T], p: usize) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }

    let idx = (sorted.len() * p / 100).min(sorted.len() - 1);
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[5.0, 6.0, 8.0, 9.0]), 7.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_standard_deviation() {
        let sd = standard_deviation(&[5.0, 6.0, 8.0, 9.0]);
        assert!((sd - 2.5f64.sqrt()).abs() < 1e-12, "sd: {}", sd);
        assert_eq!(standard_deviation(&[3.0, 3.0, 3.0]), 0.0);
    }

    #[test]
    fn test_geometric_and_harmonic_skip_non_positive() {
        let g = geometric_mean(&[0.0, -3.0, 2.0, 8.0]);
        assert!((g - 4.0).abs() < 1e-12, "g: {}", g);

        let h = harmonic_mean(&[-1.0, 1.0, 4.0, 4.0]);
        assert!((h - 2.0).abs() < 1e-12, "h: {}", h);

        assert_eq!(geometric_mean(&[0.0, -1.0]), 0.0);
        assert_eq!(harmonic_mean(&[]), 0.0);
    }

    #[test]
    fn test_quadratic_mean() {
        let q = quadratic_mean(&[3.0, 4.0]);
        assert!((q - 12.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_rank() {
        let sorted = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(nearest_rank(&sorted, 50), Some(6));
        assert_eq!(nearest_rank(&sorted, 5), Some(1));
        assert_eq!(nearest_rank(&sorted, 95), Some(10));
        assert_eq!(nearest_rank::<u32>(&[], 50), None);
    }
}
