/// Failures local to a single spirometric index.
///
/// These describe a curve on which an index is undefined rather than bad input, so callers
/// normally keep them per index instead of aborting.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// No row matched the exact key an index needs
    #[error("{index}: no row at {key}")]
    NotFound { index: &'static str, key: f64 },

    #[error("{index}: division by zero")]
    DivideByZero { index: &'static str },

    #[error("curve has no rows")]
    EmptyCurve,

    /// Consecutive volumes are not spaced by the assumed increment
    #[error("expected volume spacing {expected} but found {found} at row {position}")]
    NonUniformSpacing {
        expected: f64,
        found: f64,
        position: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Reader failure not attributable to a single cell
    #[error("trial parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required cell is missing, not valid UTF-8, or not a usable number
    #[error("trial {trial}, row {row}, column {column}: {reason}")]
    Parse {
        trial: String,
        row: usize,
        column: usize,
        reason: String,
    },

    /// A trial without rows has no total lung capacity reference
    #[error("trial {trial} has no samples")]
    EmptyTrial { trial: String },

    #[error("no trials to build an envelope from")]
    NoTrials,

    #[error("invalid curve: {0}")]
    InvalidCurve(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}
