use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::indices::IndexOptions;
use crate::{Error, Result};

/// Zero-based positions of the time, volume and flow columns in a trial file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ColumnSelection {
    pub time: usize,
    pub volume: usize,
    pub flow: usize,
}

impl Default for ColumnSelection {
    fn default() -> Self {
        Self {
            time: 0,
            volume: 1,
            flow: 2,
        }
    }
}

/// Run configuration, usually read from a `mefv.toml`
///
/// Every field has a default, so a config file only needs the keys it changes:
///
/// ```
/// use mefv::Config;
///
/// let config = Config::from_toml_str(
///     r#"
///     trial_extension = "tsv"
///
///     [columns]
///     time = 0
///     volume = 2
///     flow = 1
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.columns.volume, 2);
/// assert_eq!(config.delimiter, '\t');
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Field separator of the trial files
    pub delimiter: char,
    /// Whether the first line of a trial file is a header row
    pub has_headers: bool,
    /// Only files with this extension inside a subject directory are read as trials
    pub trial_extension: String,
    pub columns: ColumnSelection,
    pub indices: IndexOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            has_headers: true,
            trial_extension: "txt".to_owned(),
            columns: ColumnSelection::default(),
            indices: IndexOptions::default(),
        }
    }
}

impl Config {
    /// Read a config from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse a config from TOML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The delimiter as the single byte the csv reader expects
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for delimiters outside ASCII.
    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("delimiter {:?} is not ASCII", self.delimiter))
            })
    }

    fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        let step = self.indices.volume_step;
        if step.is_nan() || step <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "volume_step must be positive, got {step}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Config;
    use crate::math::LookupMode;
    use crate::Error;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.delimiter_byte().unwrap(), b'\t');
    }

    #[test]
    fn lookup_mode_is_read_from_a_tagged_table() {
        let config = Config::from_toml_str(
            r#"
            [indices]
            validate_spacing = false

            [indices.lookup]
            mode = "tolerance"
            tolerance = 0.005
            "#,
        )
        .unwrap();

        assert_eq!(
            config.indices.lookup,
            LookupMode::Tolerance { tolerance: 0.005 }
        );
        assert!(!config.indices.validate_spacing);
    }

    #[test]
    fn non_ascii_delimiter_is_rejected() {
        let result = Config::from_toml_str("delimiter = \"§\"");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn config_survives_a_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
