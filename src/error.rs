//! Error type shared by every module of the crate.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DnpError>;

#[derive(Error, Debug)]
pub enum DnpError {
    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Unknown dimension '{0}'")]
    UnknownDim(String),

    #[error("Dimension '{0}' already exists")]
    DuplicateDim(String),

    #[error("Coordinates of dimension '{dim}' do not match: {reason}")]
    CoordMismatch { dim: String, reason: String },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Fit failed: {0}")]
    FitFailed(String),

    #[error("Unrecognised data format: {0}")]
    DataFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DnpError {
    pub(crate) fn bad_argument<S: Into<String>>(msg: S) -> Self {
        DnpError::BadArgument(msg.into())
    }

    pub(crate) fn fit_failed<S: Into<String>>(msg: S) -> Self {
        DnpError::FitFailed(msg.into())
    }
}

impl From<ndarray::ShapeError> for DnpError {
    fn from(e: ndarray::ShapeError) -> Self {
        DnpError::BadArgument(format!("array shape: {}", e))
    }
}
