//! Reference head position for the spatial stage.
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::library::SignalLibrary;
use crate::lineage::StageTag;
use crate::recording::HeadTransform;
use crate::resolver::RunResolver;

/// Lazily resolves, then caches, the head position of a subject's
/// reference run.
///
/// Only the header of the reference raw artifact is read. Nothing is looked
/// up until [`destination`](Self::destination) is first called, so a subject
/// whose runs are all missing reports that instead of a missing reference.
pub struct ReferenceAlignment<'a> {
    config: &'a PipelineConfig,
    runs: &'a RunResolver,
    library: &'a dyn SignalLibrary,
    subject: &'a str,
    cached: Option<HeadTransform>,
}

impl<'a> ReferenceAlignment<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runs: &'a RunResolver,
        library: &'a dyn SignalLibrary,
        subject: &'a str,
    ) -> Self {
        Self {
            config,
            runs,
            library,
            subject,
            cached: None,
        }
    }

    /// Head position every run of the subject is re-expressed in.
    pub fn destination(&mut self) -> Result<HeadTransform> {
        if let Some(t) = self.cached {
            return Ok(t);
        }
        let run = self.config.reference_run(self.subject)?;
        let path = self.runs.resolve(self.subject, run, StageTag::Raw);
        if !path.is_file() {
            return Err(Error::MissingReferenceAlignment {
                subject: self.subject.to_string(),
                run: run.to_string(),
                path,
            });
        }
        let t = self
            .library
            .read_head_position(&path)?
            .ok_or_else(|| Error::format(&path, "reference run carries no head position"))?;
        log::info!(
            "subject {}: aligning runs to reference run '{run}' ({})",
            self.subject,
            path.display()
        );
        self.cached = Some(t);
        Ok(t)
    }
}
