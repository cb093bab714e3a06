use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::envelope::{build_envelope, MefvCurve};
use crate::indices::{compute_indices, SpirometryIndices};
use crate::ingest::{SubjectDirectory, TrialSource};
use crate::trial::{normalize, TrialProfile};
use crate::Result;

/// Everything derived for one subject
#[derive(Clone, Debug)]
pub struct SubjectReport {
    pub subject: String,
    pub trial_count: usize,
    pub curve: MefvCurve,
    pub indices: SpirometryIndices,
}

/// Result of one subject inside a batch
#[derive(Debug)]
pub struct SubjectOutcome {
    pub subject: String,
    pub result: Result<SubjectReport>,
}

/// Run the whole pipeline for one subject
///
/// Undefined indices do not fail the subject, they are recorded in the report.
///
/// # Errors
/// Returns an error if a trial cannot be read or parsed, a trial is empty, or the subject has
/// no trials at all.
pub fn analyse<S: TrialSource + ?Sized>(source: &S, config: &Config) -> Result<SubjectReport> {
    let subject = source.name().to_owned();
    log::info!("working on subject {subject}");

    let trials = source.trials()?;
    let profiles = trials
        .iter()
        .map(|trial| normalize(trial, config.columns))
        .collect::<Result<Vec<TrialProfile>>>()?;
    log::debug!("normalized {} trials for {subject}", profiles.len());

    let curve = build_envelope(&profiles)?;
    let indices = compute_indices(&curve, &config.indices);
    for (index, err) in indices.failures() {
        log::warn!("{subject}: {index} undefined: {err}");
    }

    Ok(SubjectReport {
        subject,
        trial_count: profiles.len(),
        curve,
        indices,
    })
}

/// Analyse several subjects, isolating each one's failure from the rest
pub fn analyse_all<S: TrialSource>(sources: &[S], config: &Config) -> Vec<SubjectOutcome> {
    sources
        .iter()
        .map(|source| {
            let result = analyse(source, config);
            if let Err(err) = &result {
                log::warn!("skipping subject {}: {err}", source.name());
            }
            SubjectOutcome {
                subject: source.name().to_owned(),
                result,
            }
        })
        .collect()
}

/// Analyse every subject directory under `working_directory`
///
/// Each sub-directory is one subject and holds that subject's trial files. Subjects are
/// processed in name order.
///
/// # Errors
/// Returns an error only if `working_directory` itself cannot be listed; failures of single
/// subjects are reported in their [`SubjectOutcome`].
pub fn build(working_directory: &Path, config: &Config) -> Result<Vec<SubjectOutcome>> {
    let mut subject_dirs = fs::read_dir(working_directory)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    subject_dirs.retain(|path| path.is_dir());
    subject_dirs.sort();
    log::info!(
        "found {} subjects in {working_directory:?}",
        subject_dirs.len()
    );

    let sources = subject_dirs
        .into_iter()
        .map(|path| SubjectDirectory::new(path, config))
        .collect::<Vec<_>>();

    Ok(analyse_all(&sources, config))
}
