use std::collections::BTreeMap;

use crate::config::ColumnSelection;
use crate::math::{centi_key, checked_centi_key, from_centi_key};
use crate::{Error, Result};

/// One row of a forced-expiration recording
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawTrialSample {
    /// Seconds
    pub time: f64,
    /// Litres
    pub volume: f64,
    /// Litres per second
    pub flow: f64,
}

/// A trial file as read from disk, one vector of text cells per data row
#[derive(Clone, Debug, Default)]
pub struct TrialTable {
    /// Where the trial came from, used in error messages
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl TrialTable {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Extract the selected columns of every row as numbers
    ///
    /// # Errors
    /// Returns [`Error::Parse`] if a selected cell is absent or is not a finite number.
    pub fn samples(&self, columns: ColumnSelection) -> Result<Vec<RawTrialSample>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(row, cells)| {
                Ok(RawTrialSample {
                    time: self.cell(row, cells, columns.time)?,
                    volume: self.cell(row, cells, columns.volume)?,
                    flow: self.cell(row, cells, columns.flow)?,
                })
            })
            .collect()
    }

    fn cell(&self, row: usize, cells: &[String], column: usize) -> Result<f64> {
        let parse_error = |reason: String| Error::Parse {
            trial: self.name.clone(),
            row,
            column,
            reason,
        };

        let text = cells
            .get(column)
            .ok_or_else(|| parse_error(format!("row has only {} columns", cells.len())))?;
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| parse_error(format!("{text:?} is not a number")))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(parse_error(format!("{text:?} is not finite")))
        }
    }
}

/// Mean flow of one trial at every two-decimal volume, ordered by volume
///
/// Volumes are offsets from the first recorded volume of the trial, which is taken to be total
/// lung capacity. Negative volumes are samples recorded before the subject reached it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrialProfile {
    points: Vec<(f64, f64)>,
}

impl TrialProfile {
    /// Group `(volume, flow)` pairs by rounded volume, averaging the flow within each group
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut groups: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for (volume, flow) in points {
            let group = groups.entry(centi_key(volume)).or_insert((0.0, 0));
            group.0 += flow;
            group.1 += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let points = groups
            .into_iter()
            .map(|(key, (sum, count))| (from_centi_key(key), sum / count as f64))
            .collect();

        Self { points }
    }

    /// `(volume, flow)` pairs in ascending volume order
    #[must_use]
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn volumes(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|&(volume, _)| volume)
    }

    /// The flow at exactly `volume`, if the trial reached it
    #[must_use]
    pub fn flow_at(&self, volume: f64) -> Option<f64> {
        let key = centi_key(volume);
        self.points
            .binary_search_by_key(&key, |&(v, _)| centi_key(v))
            .ok()
            .map(|ii| self.points[ii].1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Turn one trial into a volume-indexed flow profile anchored at total lung capacity
///
/// The time column is parsed, so a malformed one is still reported, but the profile only keeps
/// volume and flow.
///
/// # Errors
/// Returns [`Error::EmptyTrial`] for a table without rows and [`Error::Parse`] for missing or
/// non-numeric cells, or for a volume too far from the first one to place on the centi-litre grid.
pub fn normalize(table: &TrialTable, columns: ColumnSelection) -> Result<TrialProfile> {
    if table.rows.is_empty() {
        return Err(Error::EmptyTrial {
            trial: table.name.clone(),
        });
    }

    let samples = table.samples(columns)?;
    let total_lung_capacity = samples[0].volume;

    let mut points = Vec::with_capacity(samples.len());
    for (row, sample) in samples.iter().enumerate() {
        let offset = sample.volume - total_lung_capacity;
        if checked_centi_key(offset).is_none() {
            return Err(Error::Parse {
                trial: table.name.clone(),
                row,
                column: columns.volume,
                reason: format!("volume offset {offset} is out of range"),
            });
        }
        points.push((offset, sample.flow));
    }

    Ok(TrialProfile::from_points(points))
}
