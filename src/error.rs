//! Error taxonomy shared by the stimulus compiler, the configuration
//! builder and the AEC estimator.
//!
//! The three subsystems recover nothing: every failure is fatal to the
//! current call and is reported to the orchestrating protocol script,
//! which treats it as fatal to the trial.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A builder was handed structurally invalid input: an unknown
    /// waveform or node kind, a missing required parameter, an unclosed
    /// composite group. Raised synchronously, before any output exists.
    #[error("schema error: {0}")]
    Schema(String),

    /// A connection target that resolves to no node, or an identity
    /// collision. Raised when the document is written.
    #[error("reference error: {0}")]
    Reference(String),

    /// The kernel estimation hit a numerical dead end; the message
    /// carries the offending statistic. No kernel file is written.
    #[error("degenerate recording: {0}")]
    Degenerate(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
