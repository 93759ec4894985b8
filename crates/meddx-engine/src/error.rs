use std::fmt;

use meddx_contracts::upload::UnsupportedFormat;
use thiserror::Error;

/// Any failure talking to the model provider. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("provider response malformed: {0}")]
    MalformedResponse(String),
}

/// Which action was attempted out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    NoStagedImage,
    NoDiagnosticResult,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStagedImage => f.write_str("no image staged; upload an image first"),
            Self::NoDiagnosticResult => {
                f.write_str("no diagnostic report yet; analyze an image first")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{file_name}: {source}")]
    UploadFormat {
        file_name: String,
        #[source]
        source: UnsupportedFormat,
    },

    #[error("could not read {file_name}: {source}")]
    UploadRead {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("{0}")]
    Precondition(Precondition),

    #[error("staged image buffer: {0}")]
    Staging(#[from] std::io::Error),
}

impl SessionError {
    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            Self::Precondition(which) => Some(*which),
            _ => None,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
