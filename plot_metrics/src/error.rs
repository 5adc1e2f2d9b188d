use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlotError>;

#[derive(Debug, Error)]
pub enum PlotError {
    /// A required property has no extract for a scenario.
    #[error("{property} is missing for scenario {scenario}")]
    MissingProperty { property: String, scenario: String },

    /// Cross-section on a level or key that the table does not carry.
    #[error("no rows for {level} = {key}")]
    KeyNotFound { level: String, key: String },

    #[error("{0} has no data")]
    EmptyTable(String),

    #[error("could not parse {what} from \"{value}\" in {path}")]
    Parse {
        path: PathBuf,
        what: &'static str,
        value: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),
}
