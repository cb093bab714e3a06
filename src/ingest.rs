use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::trial::TrialTable;
use crate::{Error, Result};

/// Anything that can hand over the parsed trials of one subject
pub trait TrialSource {
    /// Subject identifier used in reports and logs
    fn name(&self) -> &str;

    /// Every trial recorded for the subject
    ///
    /// # Errors
    /// Returns an error if a trial cannot be read.
    fn trials(&self) -> Result<Vec<TrialTable>>;
}

/// A subject whose trials are already in memory
#[derive(Clone, Debug, Default)]
pub struct Subject {
    pub name: String,
    pub trials: Vec<TrialTable>,
}

impl TrialSource for Subject {
    fn name(&self) -> &str {
        &self.name
    }

    fn trials(&self) -> Result<Vec<TrialTable>> {
        Ok(self.trials.clone())
    }
}

/// A directory holding one delimited text file per trial
///
/// Only files carrying the configured trial extension are read; anything else in the directory
/// is ignored.
pub struct SubjectDirectory<'a> {
    name: String,
    path: PathBuf,
    config: &'a Config,
}

impl<'a> SubjectDirectory<'a> {
    /// The subject takes its name from the last component of `path`
    pub fn new(path: impl Into<PathBuf>, config: &'a Config) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        Self { name, path, config }
    }

    /// Trial files of the subject in name order
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub fn trial_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = fs::read_dir(&self.path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?;

        paths.retain(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == self.config.trial_extension.as_str())
        });
        paths.sort();
        Ok(paths)
    }
}

impl TrialSource for SubjectDirectory<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn trials(&self) -> Result<Vec<TrialTable>> {
        self.trial_paths()?
            .iter()
            .map(|path| read_trial(path, self.config))
            .collect()
    }
}

/// Read one trial file into text cells
///
/// Rows may have differing lengths here; a missing cell only becomes an error once the
/// normalizer asks for it.
///
/// # Errors
/// Returns [`Error::Parse`] for a cell that is not valid UTF-8, and [`Error::Csv`] or
/// [`Error::Io`] if the file cannot be opened or read.
pub fn read_trial(path: &Path, config: &Config) -> Result<TrialTable> {
    log::debug!("reading {path:?}");
    let name = path.display().to_string();
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(config.delimiter_byte()?)
        .has_headers(config.has_headers)
        .flexible(true)
        .from_path(path)?;

    let mut rows: Vec<Vec<String>> = vec![];
    for result in rdr.records() {
        let record = result.map_err(|err| record_error(&name, rows.len(), err))?;
        rows.push(record.iter().map(str::to_owned).collect());
    }

    Ok(TrialTable::new(name, rows))
}

// Undecodable cells belong to the trial's parse errors; reader failures stay csv errors
fn record_error(trial: &str, row: usize, err: csv::Error) -> Error {
    let column = match err.kind() {
        csv::ErrorKind::Utf8 { err, .. } => Some(err.field()),
        _ => None,
    };
    match column {
        Some(column) => Error::Parse {
            trial: trial.to_owned(),
            row,
            column,
            reason: format!("cell is not valid UTF-8 ({err})"),
        },
        None => Error::Csv(err),
    }
}

#[cfg(test)]
mod test {
    use tempdir::TempDir;

    use super::{read_trial, SubjectDirectory, TrialSource};
    use crate::config::Config;
    use crate::Error;

    #[test]
    fn trials_are_read_as_text_cells_without_header() {
        let dir = TempDir::new("trials_are_read_as_text_cells").unwrap();
        let path = dir.path().join("blow1.txt");
        std::fs::write(&path, "time\tvolume\tflow\n0.00\t5.1\t0.2\n0.01\t5.0\n").unwrap();

        let table = read_trial(&path, &Config::default()).unwrap();

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["0.00", "5.1", "0.2"]);
        assert_eq!(table.rows[1].len(), 2);
    }

    #[test]
    fn only_files_with_the_trial_extension_are_trials() {
        let dir = TempDir::new("only_files_with_the_trial_extension").unwrap();
        for name in ["b.txt", "a.txt", "notes.md"] {
            std::fs::write(dir.path().join(name), "t\tv\tf\n0\t1\t2\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.txt")).unwrap();
        let config = Config::default();

        let subject = SubjectDirectory::new(dir.path(), &config);
        let names = subject
            .trial_paths()
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(subject.trials().unwrap().len(), 2);
    }

    #[test]
    fn custom_delimiter_is_used() {
        let dir = TempDir::new("custom_delimiter_is_used").unwrap();
        let path = dir.path().join("blow.csv");
        std::fs::write(&path, "0.00,5.1,0.2\n").unwrap();
        let config = Config {
            delimiter: ',',
            has_headers: false,
            ..Config::default()
        };

        let table = read_trial(&path, &config).unwrap();

        assert_eq!(table.rows, vec![vec!["0.00", "5.1", "0.2"]]);
    }

    #[test]
    fn undecodable_cell_is_a_parse_error() {
        let dir = TempDir::new("undecodable_cell_is_a_parse_error").unwrap();
        let path = dir.path().join("blow.txt");
        std::fs::write(&path, b"t\tv\tf\n0.00\t5.1\t0.2\n0.01\t\xff\xfe\t0.3\n").unwrap();

        let err = read_trial(&path, &Config::default()).unwrap_err();

        match err {
            Error::Parse {
                trial, row, column, ..
            } => {
                assert!(trial.ends_with("blow.txt"));
                assert_eq!(row, 1);
                assert_eq!(column, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
