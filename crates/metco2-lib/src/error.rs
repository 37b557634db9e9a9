use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the physiological confound pipeline.
///
/// Only configuration problems are fatal to a whole invocation; everything else
/// is scoped to the recording, run or subject that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysioError {
    #[error("recording '{label}' is neither a cardiac nor a respiratory signal")]
    UnsupportedSignalKind { label: String },

    #[error("insufficient signal: {reason}")]
    InsufficientSignal { reason: String },

    #[error("subject '{subject}' was not found in the data directory")]
    MissingSubjectFiles { subject: String },

    #[error("numerically degenerate {what}")]
    NumericDegenerate { what: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("confound columns differ in length (cardiac {cardiac}, respiratory {respiratory})")]
    LengthMismatch { cardiac: usize, respiratory: usize },

    #[error("no subject directories (sub-*) found under {}", data_dir.display())]
    NoSubjects { data_dir: PathBuf },
}

impl PhysioError {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self::InsufficientSignal {
            reason: reason.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error should abort the whole invocation rather than one run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::NoSubjects { .. })
    }
}

pub type PhysioResult<T> = Result<T, PhysioError>;
