use std::collections::BTreeMap;

use itertools::Itertools;
use ndarray::Array1;

use crate::math::{centi_key, from_centi_key, reversed, strictly_monotonic};
use crate::trial::TrialProfile;
use crate::{Error, Result};

/// Maximal expiratory flow-volume curve of one subject
///
/// Rows are in the order the envelope produced them: the first row holds the flow at total lung
/// capacity. The volume labels are reversed relative to that order (see [`relabel_volumes`]), so
/// the first row carries the largest volume and reads as the volume still to be exhaled.
///
/// The curve is never mutated once built. Index computations that need a different view work on
/// their own copy.
#[derive(Clone, Debug, PartialEq)]
pub struct MefvCurve {
    volume: Array1<f64>,
    flow: Array1<f64>,
}

impl MefvCurve {
    /// Build a curve from matching volume and flow columns
    ///
    /// # Errors
    /// Returns [`Error::InvalidCurve`] if the columns differ in length, a volume is not finite
    /// or two rows share a volume.
    pub fn new(volume: Array1<f64>, flow: Array1<f64>) -> Result<Self> {
        if volume.len() != flow.len() {
            return Err(Error::InvalidCurve(format!(
                "{} volumes but {} flows",
                volume.len(),
                flow.len()
            )));
        }
        if volume.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidCurve("volumes must be finite".into()));
        }
        if !volume.iter().map(|v| (v + 0.0).to_bits()).all_unique() {
            return Err(Error::InvalidCurve("volumes must be distinct".into()));
        }
        Ok(Self { volume, flow })
    }

    #[must_use]
    pub const fn volume(&self) -> &Array1<f64> {
        &self.volume
    }

    #[must_use]
    pub const fn flow(&self) -> &Array1<f64> {
        &self.flow
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.volume.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volume.is_empty()
    }

    /// `(volume, flow)` rows in curve order
    pub fn rows(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.volume.iter().copied().zip(self.flow.iter().copied())
    }
}

/// Reverse the volume labels of `curve` while every flow stays on its row
///
/// Turns "volume exhaled since total lung capacity" into "volume left to exhale" and back. The
/// mapping only means something when the volumes run monotonically with equal steps, so a
/// volume column that is not strictly monotonic is refused. Uneven gaps are not detected and
/// silently pair flows with the wrong volumes.
///
/// # Errors
/// Returns [`Error::InvalidCurve`] if the volumes are not strictly monotonic.
pub fn relabel_volumes(curve: &MefvCurve) -> Result<MefvCurve> {
    if !strictly_monotonic(&curve.volume) {
        return Err(Error::InvalidCurve(
            "relabelling needs strictly monotonic volumes".into(),
        ));
    }
    Ok(MefvCurve {
        volume: reversed(&curve.volume),
        flow: curve.flow.clone(),
    })
}

/// Merge the profiles of every trial of a subject into one curve
///
/// At each two-decimal volume the envelope keeps the highest flow any trial reached. Volumes
/// before total lung capacity are dropped and the result is relabelled with
/// [`relabel_volumes`].
///
/// # Errors
/// Returns [`Error::NoTrials`] when `profiles` is empty.
pub fn build_envelope(profiles: &[TrialProfile]) -> Result<MefvCurve> {
    if profiles.is_empty() {
        return Err(Error::NoTrials);
    }

    let mut envelope: BTreeMap<i64, f64> = BTreeMap::new();
    for (volume, flow) in profiles.iter().flat_map(|profile| profile.points().iter()) {
        envelope
            .entry(centi_key(*volume))
            .and_modify(|best| *best = best.max(*flow))
            .or_insert(*flow);
    }

    let (volume, flow): (Vec<f64>, Vec<f64>) = envelope
        .range(0..)
        .map(|(&key, &flow)| (from_centi_key(key), flow))
        .unzip();

    if volume.is_empty() {
        log::warn!("no trial reached total lung capacity, envelope is empty");
    }
    log::debug!(
        "envelope of {} trials has {} volumes",
        profiles.len(),
        volume.len()
    );

    let ascending = MefvCurve {
        volume: Array1::from(volume),
        flow: Array1::from(flow),
    };
    relabel_volumes(&ascending)
}
