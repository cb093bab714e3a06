use std::collections::HashMap;

use itertools::Itertools;
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Round `value` to `decimals` places, ties going to the even neighbour
///
/// # Examples
///
/// ```
/// use mefv::math::round_to;
///
/// assert_eq!(round_to(0.125, 2), 0.12);
/// assert_eq!(round_to(1.004_999, 2), 1.0);
/// ```
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// Round to the two-decimal grid every volume, percent and time key lives on
#[must_use]
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// Integer hundredths of `value`, used as an ordered grouping key
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn centi_key(value: f64) -> i64 {
    (value * 100.0).round_ties_even() as i64
}

/// [`centi_key`] for values whose hundredths fit in an `i64`, `None` otherwise
///
/// Outside that range the plain cast saturates and distinct values would share a key.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
#[must_use]
pub fn checked_centi_key(value: f64) -> Option<i64> {
    let scaled = (value * 100.0).round_ties_even();
    (scaled >= i64::MIN as f64 && scaled < i64::MAX as f64).then_some(scaled as i64)
}

/// Inverse of [`centi_key`]; yields the same float as [`round2`] on the original value
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn from_centi_key(key: i64) -> f64 {
    key as f64 / 100.0
}

/// The values of `column` in reverse order
#[must_use]
pub fn reversed(column: &Array1<f64>) -> Array1<f64> {
    column.slice(s![..;-1]).to_owned()
}

/// Whether consecutive values strictly increase, or strictly decrease, throughout
#[must_use]
pub fn strictly_monotonic(column: &Array1<f64>) -> bool {
    let increasing = column.iter().tuple_windows().all(|(a, b)| a < b);
    let decreasing = column.iter().tuple_windows().all(|(a, b)| a > b);
    increasing || decreasing
}

/// Check that every pair of neighbouring values in `column` is `step` apart
///
/// # Errors
/// Returns [`IndexError::NonUniformSpacing`] at the first pair that is not.
pub fn check_uniform_spacing(column: &Array1<f64>, step: f64) -> Result<(), IndexError> {
    let epsilon = step.abs() * 1e-6;
    for (position, (a, b)) in column.iter().tuple_windows().enumerate() {
        let found = b - a;
        if (found - step).abs() > epsilon {
            return Err(IndexError::NonUniformSpacing {
                expected: step,
                found,
                position: position + 1,
            });
        }
    }
    Ok(())
}

/// How a derived key (volume, percent or time) is matched against a column
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LookupMode {
    /// Bit-for-bit equality with the rounded target
    #[default]
    Exact,
    /// Nearest value no further than `tolerance` from the target
    Tolerance { tolerance: f64 },
}

/// Row lookup over one column of a curve
///
/// Exact lookups hash the bit pattern of each value, so they behave like `==` on floats: a
/// target only matches when it was produced on the same rounding grid as the column.
pub struct KeyedLookup<'a> {
    column: &'a Array1<f64>,
    exact: HashMap<u64, usize>,
}

// Folds -0.0 into 0.0 so both hash alike, as they compare equal
fn bits(value: f64) -> u64 {
    (value + 0.0).to_bits()
}

impl<'a> KeyedLookup<'a> {
    #[must_use]
    pub fn new(column: &'a Array1<f64>) -> Self {
        let mut exact = HashMap::with_capacity(column.len());
        for (ii, &value) in column.iter().enumerate() {
            exact.entry(bits(value)).or_insert(ii);
        }
        Self { column, exact }
    }

    /// Position of the first row matching `target`
    #[must_use]
    pub fn find(&self, target: f64, mode: LookupMode) -> Option<usize> {
        match mode {
            LookupMode::Exact => {
                if target.is_nan() {
                    return None;
                }
                self.exact.get(&bits(target)).copied()
            }
            LookupMode::Tolerance { tolerance } => self
                .column
                .iter()
                .enumerate()
                .map(|(ii, value)| (ii, (value - target).abs()))
                .filter(|(_, distance)| *distance <= tolerance)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(ii, _)| ii),
        }
    }
}
