//! Artifact paths.
//!
//! [`RunResolver`] is the only place where artifact paths are built. A path
//! is a pure function of `(subject, run, stage tag)` and the configured
//! template:
//!
//! ```text
//! <meg_dir>/<subject>/<base_fname with {extension} = "<run>_<tag suffix>">.<ext>
//!
//! data/MEG/S1/S1_audvis01_raw.safetensors
//! data/MEG/S1/S1_audvis01_sss_raw.safetensors
//! data/MEG/S2/S2_audvis_annotations.json          (run "")
//! ```
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::lineage::StageTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResolver {
    meg_dir: PathBuf,
    base_fname: String,
    study_name: String,
}

impl RunResolver {
    pub fn new(meg_dir: impl Into<PathBuf>, base_fname: &str, study_name: &str) -> Self {
        Self {
            meg_dir: meg_dir.into(),
            base_fname: base_fname.to_string(),
            study_name: study_name.to_string(),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(&cfg.meg_dir, &cfg.base_fname, &cfg.study_name)
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.meg_dir.join(subject)
    }

    /// File name (no directory) of the artifact.
    pub fn file_name(&self, subject: &str, run: &str, tag: StageTag) -> String {
        let extension = format!("{run}_{}", tag.suffix());
        let mut name = expand(
            &self.base_fname,
            &[
                ("subject", subject),
                ("study", &self.study_name),
                ("extension", &extension),
            ],
        );
        name.push('.');
        name.push_str(tag.file_extension());
        name
    }

    /// Full path of the artifact of `(subject, run)` at stage `tag`.
    pub fn resolve(&self, subject: &str, run: &str, tag: StageTag) -> PathBuf {
        self.subject_dir(subject).join(self.file_name(subject, run, tag))
    }
}

/// Single-pass `{key}` substitution; unknown placeholders are kept verbatim
/// and substituted values are never re-scanned.
fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, v)) => out.push_str(v),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn resolver() -> RunResolver {
        RunResolver::new("data/MEG", "{subject}_{study}{extension}", "audvis")
    }

    #[test]
    fn names_follow_template() {
        let r = resolver();
        assert_eq!(
            r.resolve("S1", "01", StageTag::Raw),
            PathBuf::from("data/MEG/S1/S1_audvis01_raw.safetensors")
        );
        assert_eq!(
            r.resolve("S1", "01", StageTag::NoSss),
            PathBuf::from("data/MEG/S1/S1_audvis01_nosss_raw.safetensors")
        );
        assert_eq!(
            r.resolve("S2", "", StageTag::Annotations),
            PathBuf::from("data/MEG/S2/S2_audvis_annotations.json")
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let (a, b) = (resolver(), resolver());
        for tag in StageTag::ALL {
            assert_eq!(a.resolve("S1", "02", tag), b.resolve("S1", "02", tag));
        }
    }

    #[test]
    fn resolve_is_injective() {
        let r = resolver();
        let subjects = ["S1", "S2", "S10", "sub-01"];
        let runs = ["", "1", "01", "02", "10", "a-b"];
        let mut seen = HashSet::new();
        for s in subjects {
            for run in runs {
                for tag in StageTag::ALL {
                    let p = r.resolve(s, run, tag);
                    assert!(seen.insert(p.clone()), "collision on {}", p.display());
                }
            }
        }
        assert_eq!(seen.len(), subjects.len() * runs.len() * StageTag::ALL.len());
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let r = RunResolver::new("d", "{subject}{extension}", "x");
        assert_eq!(r.file_name("{study}", "", StageTag::Raw), "{study}_raw.safetensors");
    }

    #[test]
    fn unknown_placeholders_survive() {
        assert_eq!(expand("a{b}c{", &[("x", "y")]), "a{b}c{");
    }
}
