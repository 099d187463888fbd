//! The error taxonomy of the crate.
//!
//! Only [`Error::Config`] and output I/O failures abort an aggregation.
//! Everything else is a per-file or per-attribute condition that the
//! plan builder and evaluator demote to a diagnostic.

use std::path::PathBuf;
use thiserror::Error;

/// The `Result` type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Structural problem with the configuration. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every index value along `dim` was missing or invalid.
    #[error("{}: no usable index values along {dim}", .path.display())]
    UnindexableFile { path: PathBuf, dim: String },

    /// A file lies entirely outside the configured bounds.
    #[error("{}: all records outside configured bounds", .path.display())]
    BoundsOutOfRange { path: PathBuf },

    /// A configured variable is absent from an input file.
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// An indexed dimension has no cadence configured for itself.
    #[error("no expected cadence configured for dimension {0}")]
    MissingCadence(String),

    /// Isolated failure while reducing a single global attribute.
    #[error("attribute {name}: {reason}")]
    AttributeStrategy { name: String, reason: String },

    /// A datatype did not support the requested operation.
    #[error("datatype error: {0}")]
    DataType(String),

    /// An external slice resolved to a negative extent.
    #[error("invalid slice [{start}:{stop}] for dimension {dim}")]
    InvalidSlice {
        dim: String,
        start: isize,
        stop: isize,
    },

    /// Malformed or inconsistent container contents.
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("container encoding: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("document encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    /// True for the kinds that unwind to the top of a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_))
    }
}
