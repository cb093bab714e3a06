//! Spirometric indices derived from a finished [`MefvCurve`]
//!
//! Every function borrows the canonical curve immutably. FEV1, the mid-expiratory flows and the
//! slope ratio each derive their own working columns, so they can be called in any order, or
//! concurrently, on the same curve.
use std::ops::RangeInclusive;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::envelope::MefvCurve;
use crate::error::IndexError;
use crate::math::{check_uniform_spacing, reversed, round2, KeyedLookup};

pub use crate::math::LookupMode;

/// Time at which FEV1 is read, in seconds
const FEV1_TIME: f64 = 1.0;

/// Fraction of the largest volume a row must sit in to contribute to the slope ratio
const SLOPE_RATIO_BAND: RangeInclusive<f64> = 0.20..=0.80;

/// Distance, in litres, to the neighbours the tangent is taken between
const TANGENT_OFFSET: f64 = 0.2;

pub type IndexResult = Result<f64, IndexError>;

/// Tunables shared by the lookup-based indices
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Volume between consecutive curve rows assumed when integrating time for FEV1
    pub volume_step: f64,
    /// Refuse FEV1 on curves whose rows are not `volume_step` apart
    pub validate_spacing: bool,
    pub lookup: LookupMode,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            volume_step: 0.01,
            validate_spacing: true,
            lookup: LookupMode::Exact,
        }
    }
}

/// Forced vital capacity: the volume label of the first row
///
/// # Errors
/// Returns [`IndexError::EmptyCurve`] for a curve without rows.
pub fn fvc(curve: &MefvCurve) -> IndexResult {
    curve
        .volume()
        .iter()
        .next()
        .copied()
        .ok_or(IndexError::EmptyCurve)
}

/// Peak expiratory flow: the highest flow anywhere on the curve
///
/// # Errors
/// Returns [`IndexError::EmptyCurve`] for a curve without rows.
pub fn peak_flow(curve: &MefvCurve) -> IndexResult {
    if curve.is_empty() {
        return Err(IndexError::EmptyCurve);
    }
    Ok(curve.flow().fold(f64::NEG_INFINITY, |peak, &flow| peak.max(flow)))
}

/// Forced expiratory volume in one second, with default [`IndexOptions`]
///
/// # Errors
/// See [`fev1_with`].
pub fn fev1(curve: &MefvCurve) -> IndexResult {
    fev1_with(curve, &IndexOptions::default())
}

/// Forced expiratory volume in one second
///
/// Elapsed time is not taken from the recording. Each row is assumed to add
/// `options.volume_step` litres, so the time spent on it is that step over its flow. The running
/// total, rounded to two decimals, is matched against one second and the exhaled volume of the
/// first matching row is returned.
///
/// # Errors
/// - [`IndexError::EmptyCurve`] for a curve without rows
/// - [`IndexError::NonUniformSpacing`] if spacing is validated and rows are not a step apart
/// - [`IndexError::DivideByZero`] if a zero flow is reached before one second
/// - [`IndexError::NotFound`] if no rounded time matches one second
pub fn fev1_with(curve: &MefvCurve, options: &IndexOptions) -> IndexResult {
    const INDEX: &str = "FEV1";

    if curve.is_empty() {
        return Err(IndexError::EmptyCurve);
    }

    let exhaled = reversed(curve.volume());
    if options.validate_spacing {
        check_uniform_spacing(&exhaled, options.volume_step)?;
    }

    // Time can't be integrated past a row without flow
    let mut elapsed = 0.0;
    let time: Array1<f64> = curve
        .flow()
        .iter()
        .map_while(|&flow| {
            (flow != 0.0).then(|| {
                elapsed += options.volume_step / flow;
                round2(elapsed)
            })
        })
        .collect();

    match KeyedLookup::new(&time).find(FEV1_TIME, options.lookup) {
        Some(ii) => Ok(exhaled[ii]),
        None if time.len() < curve.len() => Err(IndexError::DivideByZero { index: INDEX }),
        None => Err(IndexError::NotFound {
            index: INDEX,
            key: FEV1_TIME,
        }),
    }
}

/// The mid-expiratory flows, named by the fraction of the vital capacity already exhaled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidFlow {
    Fef25,
    Fef50,
    Fef75,
}

impl MidFlow {
    #[must_use]
    pub const fn fraction(self) -> f64 {
        match self {
            Self::Fef25 => 0.25,
            Self::Fef50 => 0.50,
            Self::Fef75 => 0.75,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fef25 => "FEF25",
            Self::Fef50 => "FEF50",
            Self::Fef75 => "FEF75",
        }
    }
}

// Curve rows in exhaled order with each volume as a rounded fraction of the last one
struct PercentView<'a> {
    flow: &'a Array1<f64>,
    percent: Array1<f64>,
}

impl<'a> PercentView<'a> {
    fn new(curve: &'a MefvCurve, index: &'static str) -> Result<Self, IndexError> {
        let exhaled = reversed(curve.volume());
        let capacity = *exhaled.iter().next_back().ok_or(IndexError::EmptyCurve)?;
        if capacity == 0.0 {
            return Err(IndexError::DivideByZero { index });
        }
        Ok(Self {
            flow: curve.flow(),
            percent: exhaled.mapv(|volume| round2(volume / capacity)),
        })
    }

    fn flow_at(&self, which: MidFlow, lookup: &KeyedLookup<'_>, mode: LookupMode) -> IndexResult {
        let fraction = which.fraction();
        lookup
            .find(fraction, mode)
            .map(|ii| round2(self.flow[ii]))
            .ok_or(IndexError::NotFound {
                index: which.name(),
                key: fraction,
            })
    }
}

/// One mid-expiratory flow, rounded to two decimals
///
/// # Errors
/// - [`IndexError::EmptyCurve`] for a curve without rows
/// - [`IndexError::DivideByZero`] if the exhaled vital capacity is zero
/// - [`IndexError::NotFound`] if no row sits at exactly the requested fraction
pub fn fef(curve: &MefvCurve, which: MidFlow, options: &IndexOptions) -> IndexResult {
    let view = PercentView::new(curve, which.name())?;
    let lookup = KeyedLookup::new(&view.percent);
    view.flow_at(which, &lookup, options.lookup)
}

/// FEF25, FEF50 and FEF75 with default [`IndexOptions`]
///
/// # Errors
/// See [`mid_flows_with`].
pub fn mid_flows(curve: &MefvCurve) -> Result<(f64, f64, f64), IndexError> {
    mid_flows_with(curve, &IndexOptions::default())
}

/// FEF25, FEF50 and FEF75 together
///
/// # Errors
/// Fails with the error of the first of the three flows that is undefined; see [`fef`].
pub fn mid_flows_with(
    curve: &MefvCurve,
    options: &IndexOptions,
) -> Result<(f64, f64, f64), IndexError> {
    let view = PercentView::new(curve, "FEF")?;
    let lookup = KeyedLookup::new(&view.percent);
    Ok((
        view.flow_at(MidFlow::Fef25, &lookup, options.lookup)?,
        view.flow_at(MidFlow::Fef50, &lookup, options.lookup)?,
        view.flow_at(MidFlow::Fef75, &lookup, options.lookup)?,
    ))
}

/// Slope ratio with default [`IndexOptions`]
///
/// # Errors
/// See [`slope_ratio_with`].
pub fn slope_ratio(curve: &MefvCurve) -> IndexResult {
    slope_ratio_with(curve, &IndexOptions::default())
}

/// Mean ratio of tangent slope to chord slope through the middle of the curve
///
/// For every row but the last whose volume label lies between 20% and 80% of the largest one,
/// the tangent is the flow difference between the rows 0.2 L either side of it, and the chord
/// is its flow over its exhaled volume. Both neighbours must exist on the curve.
///
/// # Errors
/// - [`IndexError::EmptyCurve`] for a curve without rows
/// - [`IndexError::NotFound`] if a neighbour 0.2 L away is missing
/// - [`IndexError::DivideByZero`] if no row is in the band, or a chord has zero volume or flow
#[allow(clippy::cast_precision_loss)]
pub fn slope_ratio_with(curve: &MefvCurve, options: &IndexOptions) -> IndexResult {
    const INDEX: &str = "slope ratio";

    if curve.is_empty() {
        return Err(IndexError::EmptyCurve);
    }

    let largest = curve
        .volume()
        .fold(f64::NEG_INFINITY, |largest, &volume| largest.max(volume));
    if largest == 0.0 {
        return Err(IndexError::DivideByZero { index: INDEX });
    }
    let percent = curve.volume().mapv(|volume| volume / largest);
    let exhaled = reversed(curve.volume());
    let flow = curve.flow();
    let lookup = KeyedLookup::new(&exhaled);

    let neighbour = |target: f64| {
        lookup
            .find(target, options.lookup)
            .map(|ii| flow[ii])
            .ok_or(IndexError::NotFound { index: INDEX, key: target })
    };

    let mut sum = 0.0;
    let mut count = 0usize;
    for ii in 0..curve.len() - 1 {
        if !SLOPE_RATIO_BAND.contains(&percent[ii]) {
            continue;
        }

        let flow_above = neighbour(round2(exhaled[ii] + TANGENT_OFFSET))?;
        let flow_below = neighbour(round2(exhaled[ii] - TANGENT_OFFSET))?;
        let tangent = (flow_below - flow_above) / (2.0 * TANGENT_OFFSET);

        if exhaled[ii] == 0.0 || flow[ii] == 0.0 {
            return Err(IndexError::DivideByZero { index: INDEX });
        }
        let chord = flow[ii] / exhaled[ii];

        sum += (tangent / chord).abs();
        count += 1;
    }

    if count == 0 {
        return Err(IndexError::DivideByZero { index: INDEX });
    }
    Ok(sum / count as f64)
}

/// Every index of one curve, each either a value or the reason it is undefined
#[derive(Clone, Debug, PartialEq)]
pub struct SpirometryIndices {
    pub fvc: IndexResult,
    pub pef: IndexResult,
    pub fev1: IndexResult,
    pub fef25: IndexResult,
    pub fef50: IndexResult,
    pub fef75: IndexResult,
    pub slope_ratio: IndexResult,
}

/// The defined values of [`SpirometryIndices`], ready to serialize
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct IndexSummary {
    pub fvc: Option<f64>,
    pub pef: Option<f64>,
    pub fev1: Option<f64>,
    pub fef25: Option<f64>,
    pub fef50: Option<f64>,
    pub fef75: Option<f64>,
    pub slope_ratio: Option<f64>,
}

impl SpirometryIndices {
    fn named(&self) -> [(&'static str, &IndexResult); 7] {
        [
            ("FVC", &self.fvc),
            ("PEF", &self.pef),
            ("FEV1", &self.fev1),
            ("FEF25", &self.fef25),
            ("FEF50", &self.fef50),
            ("FEF75", &self.fef75),
            ("slope ratio", &self.slope_ratio),
        ]
    }

    /// Indices that could not be computed, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &IndexError)> + '_ {
        self.named()
            .into_iter()
            .filter_map(|(name, result)| result.as_ref().err().map(|err| (name, err)))
    }

    #[must_use]
    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            fvc: self.fvc.as_ref().ok().copied(),
            pef: self.pef.as_ref().ok().copied(),
            fev1: self.fev1.as_ref().ok().copied(),
            fef25: self.fef25.as_ref().ok().copied(),
            fef50: self.fef50.as_ref().ok().copied(),
            fef75: self.fef75.as_ref().ok().copied(),
            slope_ratio: self.slope_ratio.as_ref().ok().copied(),
        }
    }
}

/// Compute every index of `curve`, keeping each failure next to the index it belongs to
#[must_use]
pub fn compute_indices(curve: &MefvCurve, options: &IndexOptions) -> SpirometryIndices {
    SpirometryIndices {
        fvc: fvc(curve),
        pef: peak_flow(curve),
        fev1: fev1_with(curve, options),
        fef25: fef(curve, MidFlow::Fef25, options),
        fef50: fef(curve, MidFlow::Fef50, options),
        fef75: fef(curve, MidFlow::Fef75, options),
        slope_ratio: slope_ratio_with(curve, options),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, Array1};

    use super::{
        compute_indices, fef, fev1, fev1_with, fvc, mid_flows, peak_flow, slope_ratio,
        IndexOptions, IndexSummary, LookupMode, MidFlow,
    };
    use crate::envelope::{build_envelope, MefvCurve};
    use crate::error::IndexError;
    use crate::trial::TrialProfile;

    /// A relabelled curve over `rows` volumes `step_centi` hundredths apart, with flows given by
    /// `flow_of` as a function of exhaled volume
    #[allow(clippy::cast_precision_loss)]
    fn curve(rows: i64, step_centi: i64, flow_of: impl Fn(f64) -> f64) -> MefvCurve {
        let exhaled = (0..rows)
            .map(|ii| (ii * step_centi) as f64 / 100.0)
            .collect::<Vec<_>>();
        let flow = exhaled.iter().map(|&v| flow_of(v)).collect::<Array1<_>>();
        let labels = exhaled.iter().rev().copied().collect::<Array1<_>>();
        MefvCurve::new(labels, flow).unwrap()
    }

    #[test]
    fn fvc_is_the_first_volume_label() {
        let profile = TrialProfile::from_points([(0.0, 1.0), (0.01, 2.0), (0.02, 3.0)]);
        let curve = build_envelope(&[profile]).unwrap();

        assert_eq!(fvc(&curve), Ok(0.02));
    }

    #[test]
    fn peak_flow_is_the_largest_flow() {
        let curve = MefvCurve::new(arr1(&[0.02, 0.01, 0.0]), arr1(&[1.0, 3.0, 2.0])).unwrap();
        assert_eq!(peak_flow(&curve), Ok(3.0));
    }

    #[test]
    fn empty_curves_have_no_indices() {
        let curve = MefvCurve::new(arr1(&[]), arr1(&[])).unwrap();

        assert_eq!(fvc(&curve), Err(IndexError::EmptyCurve));
        assert_eq!(peak_flow(&curve), Err(IndexError::EmptyCurve));
        assert_eq!(fev1(&curve), Err(IndexError::EmptyCurve));
        assert_eq!(mid_flows(&curve), Err(IndexError::EmptyCurve));
        assert_eq!(slope_ratio(&curve), Err(IndexError::EmptyCurve));
    }

    #[test]
    fn fev1_is_read_where_integrated_time_reaches_one_second() {
        // 0.01 L at 1 L/s takes 0.01 s, so the 100th row is reached after one second
        let curve = curve(151, 1, |_| 1.0);
        approx::assert_relative_eq!(fev1(&curve).unwrap(), 0.99);
    }

    #[test]
    fn fev1_is_missing_when_the_blow_is_shorter_than_a_second() {
        let curve = curve(50, 1, |_| 1.0);
        assert_eq!(
            fev1(&curve),
            Err(IndexError::NotFound {
                index: "FEV1",
                key: 1.0
            })
        );
    }

    #[test]
    fn fev1_stops_at_a_row_without_flow() {
        let curve = curve(151, 1, |v| if v < 0.5 { 1.0 } else { 0.0 });
        assert_eq!(
            fev1(&curve),
            Err(IndexError::DivideByZero { index: "FEV1" })
        );
    }

    #[test]
    fn fev1_refuses_coarse_volume_grids() {
        let curve = curve(20, 2, |_| 1.0);
        assert!(matches!(
            fev1(&curve),
            Err(IndexError::NonUniformSpacing { position: 1, .. })
        ));

        // without validation the 0.01 L assumption is applied regardless
        let options = IndexOptions {
            validate_spacing: false,
            ..IndexOptions::default()
        };
        let long = self::curve(151, 2, |_| 1.0);
        approx::assert_relative_eq!(fev1_with(&long, &options).unwrap(), 1.98);
    }

    #[test]
    fn mid_flows_are_read_at_fractions_of_the_vital_capacity() {
        let curve = curve(101, 1, |v| 10.0 * v);

        let (fef25, fef50, fef75) = mid_flows(&curve).unwrap();

        approx::assert_relative_eq!(fef25, 2.5);
        approx::assert_relative_eq!(fef50, 5.0);
        approx::assert_relative_eq!(fef75, 7.5);
    }

    #[test]
    fn fef50_is_not_found_when_the_percent_grid_skips_one_half() {
        // exhaled volumes 0.0..=0.7 in 0.1 steps give percents of sevenths
        let curve = curve(8, 10, |v| 5.0 - v);

        assert_eq!(
            fef(&curve, MidFlow::Fef50, &IndexOptions::default()),
            Err(IndexError::NotFound {
                index: "FEF50",
                key: 0.5
            })
        );

        let tolerant = IndexOptions {
            lookup: LookupMode::Tolerance { tolerance: 0.1 },
            ..IndexOptions::default()
        };
        assert!(fef(&curve, MidFlow::Fef50, &tolerant).is_ok());
    }

    #[test]
    fn linear_flow_through_the_origin_has_unit_slope_ratio() {
        // flow proportional to exhaled volume: tangent and chord coincide
        let curve = curve(11, 20, |v| 3.0 * v);
        approx::assert_relative_eq!(slope_ratio(&curve).unwrap(), 1.0, max_relative = 1e-9);
    }

    #[test]
    fn slope_ratio_of_an_affine_flow_matches_hand_derivation() {
        // flow = 1 + v: tangent is -1, chord is (1 + v) / v, so each ratio is v / (1 + v)
        let curve = curve(11, 20, |v| 1.0 + v);
        let expected = [0.4f64, 0.6, 0.8, 1.0, 1.2, 1.4, 1.6]
            .iter()
            .map(|v| v / (1.0 + v))
            .sum::<f64>()
            / 7.0;

        approx::assert_relative_eq!(slope_ratio(&curve).unwrap(), expected, max_relative = 1e-9);
    }

    #[test]
    fn slope_ratio_needs_neighbours_exactly_two_decilitres_away() {
        let curve = curve(6, 30, |v| 4.0 - v);
        assert!(matches!(
            slope_ratio(&curve),
            Err(IndexError::NotFound { index: "slope ratio", .. })
        ));
    }

    #[test]
    fn slope_ratio_without_rows_in_band_divides_by_zero() {
        let curve = curve(2, 1, |_| 1.0);
        assert_eq!(
            slope_ratio(&curve),
            Err(IndexError::DivideByZero {
                index: "slope ratio"
            })
        );
    }

    #[test]
    fn slope_ratio_with_a_zero_flow_chord_divides_by_zero() {
        let curve = curve(11, 20, |v| if (v - 0.8).abs() < 1e-9 { 0.0 } else { 1.0 + v });
        assert_eq!(
            slope_ratio(&curve),
            Err(IndexError::DivideByZero {
                index: "slope ratio"
            })
        );
    }

    #[test]
    fn fef_of_a_zero_capacity_curve_divides_by_zero() {
        let curve = MefvCurve::new(arr1(&[0.0]), arr1(&[2.0])).unwrap();
        assert_eq!(
            fef(&curve, MidFlow::Fef50, &IndexOptions::default()),
            Err(IndexError::DivideByZero { index: "FEF50" })
        );
    }

    #[test]
    fn indices_leave_the_curve_untouched() {
        let curve = curve(151, 1, |v| 8.0 - 4.0 * v);
        let before = curve.clone();

        let indices = compute_indices(&curve, &IndexOptions::default());

        assert_eq!(curve, before);
        assert_eq!(indices.fvc, Ok(1.5));
        assert_eq!(indices.pef, Ok(8.0));
        // repeated calls on the same curve agree
        assert_eq!(compute_indices(&curve, &IndexOptions::default()), indices);
    }

    #[test]
    fn failures_are_kept_per_index() {
        let curve = curve(8, 10, |v| 5.0 - v);

        let indices = compute_indices(&curve, &IndexOptions::default());
        let failed = indices.failures().map(|(name, _)| name).collect::<Vec<_>>();

        assert!(indices.fvc.is_ok());
        assert!(indices.pef.is_ok());
        assert!(failed.contains(&"FEF50"));
        assert!(failed.contains(&"FEV1"));

        let summary = indices.summary();
        assert_eq!(summary.fvc, Some(0.7));
        assert_eq!(summary.fef50, None);
    }

    #[test]
    fn summary_survives_a_toml_round_trip() {
        let curve = curve(11, 20, |v| 1.0 + v);
        let summary = compute_indices(&curve, &IndexOptions::default()).summary();
        assert!(summary.fvc.is_some());

        let text = toml::to_string(&summary).unwrap();
        let restored: IndexSummary = toml::from_str(&text).unwrap();

        assert_eq!(restored, summary);
    }
}
