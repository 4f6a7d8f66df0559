//! Failures while resolving voucher token settings.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A settings file exists but could not be read.
    #[error("cannot read settings file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A settings file is not valid JSON for [`crate::Config`].
    #[error("malformed settings file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Each settings file parsed, but their combination does not.
    #[error("settings do not form a valid configuration: {0}")]
    InvalidSettings(#[source] serde_json::Error),
}
