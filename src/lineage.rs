//! Stage tags and the lineage between them.
//!
//! ```text
//! raw ──┬─ sss ───┬─ filt
//!       └─ nosss ─┘
//! annotations   (sidecar of raw, not part of the recording lineage)
//! ```
//!
//! Which branch a recording takes is decided by [`SpatialMode`], and the
//! mode is persisted in every artifact downstream of `raw` so later stages
//! can check it against the current configuration.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the pipeline phase that produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageTag {
    Raw,
    Annotations,
    Sss,
    NoSss,
    Filt,
}

impl StageTag {
    pub const ALL: [StageTag; 5] = [
        StageTag::Raw,
        StageTag::Annotations,
        StageTag::Sss,
        StageTag::NoSss,
        StageTag::Filt,
    ];

    /// Short token used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            StageTag::Raw => "raw",
            StageTag::Annotations => "annotations",
            StageTag::Sss => "sss",
            StageTag::NoSss => "nosss",
            StageTag::Filt => "filt",
        }
    }

    /// Filename suffix appended after the run identifier.
    ///
    /// All suffixes are distinct and none is a suffix of another once the
    /// leading `_` separator is included, which is what keeps the run
    /// resolver injective.
    pub fn suffix(self) -> &'static str {
        match self {
            StageTag::Raw => "raw",
            StageTag::Annotations => "annotations",
            StageTag::Sss => "sss_raw",
            StageTag::NoSss => "nosss_raw",
            StageTag::Filt => "filt_raw",
        }
    }

    /// File extension of the artifact (without the dot).
    pub fn file_extension(self) -> &'static str {
        match self {
            StageTag::Annotations => "json",
            _ => "safetensors",
        }
    }
}

impl fmt::Display for StageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode of the spatial-filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    /// Spatial correction is applied, output tagged `sss`.
    Enabled,
    /// Pass-through, output tagged `nosss`.
    Disabled,
}

impl SpatialMode {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            SpatialMode::Enabled
        } else {
            SpatialMode::Disabled
        }
    }

    pub fn is_enabled(self) -> bool {
        self == SpatialMode::Enabled
    }

    pub fn output_tag(self) -> StageTag {
        match self {
            SpatialMode::Enabled => StageTag::Sss,
            SpatialMode::Disabled => StageTag::NoSss,
        }
    }
}

impl fmt::Display for SpatialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpatialMode::Enabled => "enabled",
            SpatialMode::Disabled => "disabled",
        })
    }
}
