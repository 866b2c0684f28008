//! The three per-subject pipeline stages.
//!
//! ```text
//! inspect    raw ─────────────────────────▶ (review, optional annotations)
//! maxfilter  raw ──▶ sss | nosss
//! filter     sss | nosss ──▶ filt
//! ```
//!
//! Each stage walks the subject's runs in order, skips runs whose input is
//! missing, and fails the subject when no run at all could be processed.
mod frequency;
mod inspect;
mod maxfilter;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::bads::BadChannelResolver;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::library::SignalLibrary;
use crate::lineage::StageTag;
use crate::recording::Recording;
use crate::resolver::RunResolver;

pub use inspect::{review, ChannelReview};

/// A stage selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Inspect,
    Maxfilter,
    Filter,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Inspect => "inspect",
            Stage::Maxfilter => "maxfilter",
            Stage::Filter => "filter",
        })
    }
}

/// Everything a stage needs, borrowed for the duration of one batch.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    runs: RunResolver,
    library: &'a dyn SignalLibrary,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, library: &'a dyn SignalLibrary) -> Self {
        Self {
            config,
            runs: RunResolver::from_config(config),
            library,
        }
    }

    /// Run `stage` for one subject; returns the number of runs processed.
    pub fn run_stage(&self, stage: Stage, subject: &str) -> Result<usize> {
        match stage {
            Stage::Inspect => self.inspect(subject),
            Stage::Maxfilter => self.spatial_filter(subject),
            Stage::Filter => self.frequency_filter(subject),
        }
    }

    /// Path of the run's `tag` artifact, or `None` (with a warning) if it
    /// does not exist.
    fn existing_input(&self, subject: &str, run: &str, tag: StageTag) -> Option<PathBuf> {
        let path = self.runs.resolve(subject, run, tag);
        if path.is_file() {
            return Some(path);
        }
        warn_missing(subject, run, path);
        None
    }

    /// Attach the resolved bad channels, then apply the configured channel
    /// re-typing and renaming.
    ///
    /// Bad labels name channels as acquired, before any rename; labels
    /// matching no channel are dropped with a warning. Returns the attached
    /// set under those acquisition names.
    fn prepare(&self, rec: &mut Recording, subject: &str, run: &str) -> Result<BTreeSet<String>> {
        let mut resolved = BadChannelResolver::new(self.config, &self.runs).resolve(subject, run)?;
        for label in resolved.retain_known(&rec.info) {
            log::warn!(
                "bad channel '{label}' from {} matches no channel of {subject} run '{run}'; ignoring",
                resolved.source
            );
        }
        rec.info.set_bads(&resolved.bads);

        let edits = &self.config.channels;
        if !edits.set_types.is_empty() {
            self.library.set_channel_types(rec, &edits.set_types)?;
        }
        if !edits.rename.is_empty() {
            self.library.rename_channels(rec, &edits.rename)?;
        }
        Ok(resolved.bads)
    }

    fn no_runs(&self, subject: &str, stage: StageTag) -> Error {
        Error::NoRunsProcessed {
            subject: subject.to_string(),
            stage,
        }
    }
}

fn warn_missing(subject: &str, run: &str, path: PathBuf) {
    let missing = Error::MissingRunArtifact {
        subject: subject.to_string(),
        run: run.to_string(),
        path,
    };
    log::warn!("{missing}; skipping");
}

/// Reject an input whose recorded stage is not `expected`.
fn expect_stage(rec: &Recording, expected: StageTag, path: &std::path::Path) -> Result<()> {
    if rec.info.stage != expected {
        return Err(Error::inconsistent(format!(
            "{} was written by the {} stage, expected {expected}",
            path.display(),
            rec.info.stage
        )));
    }
    Ok(())
}
