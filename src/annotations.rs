//! Annotation artifacts: curated bad-channel decisions for one run.
//!
//! Labels are channel names as acquired, before `[channels.rename]`, the
//! same names the `[bads]` table uses.
use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::recording::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Annotations {
    pub bads: BTreeSet<String>,
}

impl Annotations {
    pub fn new(bads: BTreeSet<String>) -> Self {
        Self { bads }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::format(path, format!("invalid annotations: {e}")))
    }

    /// Atomically write the annotations, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        write_atomic(path, &json)
    }
}
