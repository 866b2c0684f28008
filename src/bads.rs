//! Bad-channel resolution.
//!
//! The curated annotation artifact of a run wins over the statically
//! configured list; with neither, the run has no bad channels.
use std::collections::BTreeSet;
use std::fmt;

use crate::annotations::Annotations;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::lineage::StageTag;
use crate::recording::RecordingInfo;
use crate::resolver::RunResolver;

/// Where a resolved bad-channel set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadsSource {
    Annotations,
    Config,
    None,
}

impl fmt::Display for BadsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BadsSource::Annotations => "annotations",
            BadsSource::Config => "configuration",
            BadsSource::None => "none",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBads {
    pub bads: BTreeSet<String>,
    pub source: BadsSource,
}

impl ResolvedBads {
    /// Drop labels that name no channel of `info`; returns the dropped ones.
    pub fn retain_known(&mut self, info: &RecordingInfo) -> Vec<String> {
        let unknown: Vec<String> = self
            .bads
            .iter()
            .filter(|b| info.channel_index(b).is_none())
            .cloned()
            .collect();
        for label in &unknown {
            self.bads.remove(label);
        }
        unknown
    }
}

impl fmt::Display for ResolvedBads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source == BadsSource::None {
            return f.write_str("no bad channels configured");
        }
        write!(f, "bad channels from {}: ", self.source)?;
        if self.bads.is_empty() {
            return f.write_str("(none)");
        }
        let labels: Vec<&str> = self.bads.iter().map(String::as_str).collect();
        f.write_str(&labels.join(", "))
    }
}

pub struct BadChannelResolver<'a> {
    config: &'a PipelineConfig,
    runs: &'a RunResolver,
}

impl<'a> BadChannelResolver<'a> {
    pub fn new(config: &'a PipelineConfig, runs: &'a RunResolver) -> Self {
        Self { config, runs }
    }

    /// Bad channels of `(subject, run)`.
    ///
    /// A missing annotation artifact is not an error; an unreadable one is.
    pub fn resolve(&self, subject: &str, run: &str) -> Result<ResolvedBads> {
        let path = self.runs.resolve(subject, run, StageTag::Annotations);
        let resolved = if path.is_file() {
            ResolvedBads {
                bads: Annotations::load(&path)?.bads,
                source: BadsSource::Annotations,
            }
        } else if let Some(bads) = self.config.configured_bads(subject, run) {
            ResolvedBads {
                bads,
                source: BadsSource::Config,
            }
        } else {
            ResolvedBads {
                bads: BTreeSet::new(),
                source: BadsSource::None,
            }
        };
        log::info!("subject {subject} run '{run}': {resolved}");
        Ok(resolved)
    }
}
