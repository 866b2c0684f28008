//! Error taxonomy for the pipeline.
//!
//! Per-run faults ([`Error::MissingRunArtifact`]) are recovered inside a
//! stage; everything else is fatal for the subject being processed and is
//! handed to the scheduler wrapped in a [`SubjectFailure`].
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::lineage::StageTag;

#[derive(Error, Debug)]
pub enum Error {
    #[error("run '{run}' of subject {subject} not found: {}", path.display())]
    MissingRunArtifact {
        subject: String,
        run: String,
        path: PathBuf,
    },

    #[error("no {stage} input found for subject {subject}")]
    NoRunsProcessed { subject: String, stage: StageTag },

    #[error(
        "reference run '{run}' of subject {subject} is missing ({}); cannot align head positions",
        path.display()
    )]
    MissingReferenceAlignment {
        subject: String,
        run: String,
        path: PathBuf,
    },

    #[error("configuration inconsistency: {0}")]
    ConfigurationInconsistency(String),

    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error("malformed artifact {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start workers: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Dsp(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        Error::ConfigurationInconsistency(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fatal error tagged with the subject it belongs to.
#[derive(Debug)]
pub struct SubjectFailure {
    pub subject: String,
    pub error: Error,
}

impl fmt::Display for SubjectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject {}: {}", self.subject, self.error)
    }
}

impl std::error::Error for SubjectFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
