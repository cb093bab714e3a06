#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod indices;
pub mod ingest;
pub mod math;
pub mod subject;
pub mod trial;

pub use config::{ColumnSelection, Config};
pub use envelope::{build_envelope, relabel_volumes, MefvCurve};
pub use error::{Error, IndexError};
pub use indices::{
    compute_indices, fev1, fvc, mid_flows, peak_flow, slope_ratio, IndexOptions, LookupMode,
    SpirometryIndices,
};
pub use trial::{normalize, RawTrialSample, TrialProfile, TrialTable};

pub type Result<T> = ::std::result::Result<T, Error>;
