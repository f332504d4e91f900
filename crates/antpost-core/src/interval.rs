//! Bucket-width inference for interval-scale samples.
//!
//! Float samples rarely share an exact common step, so the width is derived by
//! expressing every gap between distinct values as an exact fraction of the
//! smallest gap and folding the denominators together with an integer LCM.

use tracing::debug;

/// Relative tolerance under which two samples are the same value.
const SAME_VALUE_EPSILON: f64 = 1e-14;

/// Relative tolerance under which a float remainder counts as zero while
/// reducing a fraction.
const REMAINDER_EPSILON: f64 = 1e-7;

/// Bias added before flooring so values meant for a bucket do not slip into
/// the previous one through rounding.
const BUCKET_BIAS: f64 = 0.1;

/// Infer `(interval, min)` for a sample set.
///
/// A set with a single distinct value (or no values) gets an interval of 1.
pub fn calc_interval(values: &[f64]) -> (f64, f64) {
    let distinct = unique_sorted(values.to_vec());
    let (min, max) = match (distinct.first(), distinct.last()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => return (1.0, 0.0),
    };

    let magnitude = min.abs().max(max.abs());
    let deltas: Vec<f64> = distinct
        .windows(2)
        .filter(|w| !is_approx(w[1], w[0], magnitude))
        .map(|w| w[1] - w[0])
        .collect();

    let deltas = unique_sorted(deltas);
    match deltas.len() {
        0 => return (1.0, min),
        1 => return (deltas[0], min),
        _ => {}
    }

    let smallest = deltas[0];
    let residues: Vec<f64> = deltas[1..]
        .iter()
        .map(|d| d % smallest)
        .filter(|r| {
            let m = r / smallest;
            m > SAME_VALUE_EPSILON && m < 1.0 - SAME_VALUE_EPSILON
        })
        .collect();

    let floor = magnitude * REMAINDER_EPSILON;
    (interval_in_lcm(smallest, &unique_sorted(residues), floor), min)
}

/// Reduce `a / b` to integers `(p, q)` with `a/b == p/q`, using Euclid's
/// algorithm on the floats themselves.
pub fn fraction(a: f64, b: f64) -> (i64, i64) {
    let (mut d, mut f) = if a < b { (b, a) } else { (a, b) };

    while d > f {
        let m = d % f;
        if is_approx_zero(m, a) {
            break;
        }

        d = f;
        f = m;
    }

    (div_to_int(a, f), div_to_int(b, f))
}

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }

    a
}

/// Coarsest step dividing `min` and every residue in `residues`.
///
/// Refinement stops at the last step above `floor`, or when the LCM no longer
/// fits in an `i64`; unrelated float gaps otherwise drive it to noise.
pub fn interval_in_lcm(min: f64, residues: &[f64], floor: f64) -> f64 {
    let mut lcm: i64 = 1;
    for &r in residues {
        let (denominator, _) = fraction(min, r);
        if denominator <= 0 {
            continue;
        }

        match (lcm / gcd(lcm, denominator)).checked_mul(denominator) {
            Some(next) if min / next as f64 > floor => lcm = next,
            _ => {
                debug!(
                    "interval refinement stopped at lcm {} (residue {}, floor {})",
                    lcm, r, floor
                );
                break;
            }
        }
    }

    min / lcm as f64
}

/// Bucket index of `v` for buckets of width `interval` starting at `min`.
pub fn bucket_index(v: f64, min: f64, interval: f64) -> i64 {
    ((v - min) / interval + BUCKET_BIAS).floor() as i64
}

/// Lower edge of the bucket holding `v`.
pub fn step_interval(v: f64, min: f64, interval: f64) -> f64 {
    min + interval * ((v - min) / interval + BUCKET_BIAS).floor()
}

/// True when `interval` is (close to) an integer multiple of `step`.
pub fn divides(interval: f64, step: f64) -> bool {
    let m = (interval % step) / step;
    m <= SAME_VALUE_EPSILON || m >= 1.0 - SAME_VALUE_EPSILON
}

pub(crate) fn is_approx(a: f64, b: f64, max: f64) -> bool {
    (a - b).abs() <= max.abs() * SAME_VALUE_EPSILON
}

fn is_approx_zero(v: f64, max: f64) -> bool {
    v.abs() <= max.abs() * REMAINDER_EPSILON
}

fn div_to_int(d: f64, f: f64) -> i64 {
    (d / f + SAME_VALUE_EPSILON).floor() as i64
}

fn unique_sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}
