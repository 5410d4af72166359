//! Error types for the callrec core library.

use std::path::PathBuf;

/// Top-level error enum for the callrec core library.
#[derive(Debug, thiserror::Error)]
pub enum CallrecError {
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Unserializable payload: {0}")]
    Unserializable(String),

    #[error("Empty payload: {}", .0.display())]
    EmptyPayload(PathBuf),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Run interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "python")]
impl From<CallrecError> for pyo3::PyErr {
    fn from(err: CallrecError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyKeyboardInterrupt, PyRuntimeError, PyValueError};

        match &err {
            CallrecError::Io(_) => PyIOError::new_err(err.to_string()),
            CallrecError::Interrupted => PyKeyboardInterrupt::new_err(err.to_string()),
            CallrecError::Process(_) => PyRuntimeError::new_err(err.to_string()),
            CallrecError::Catalog(_)
            | CallrecError::Unserializable(_)
            | CallrecError::EmptyPayload(_)
            | CallrecError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type CallrecResult<T> = Result<T, CallrecError>;
