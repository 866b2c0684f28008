//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the three stages. It
//! is loaded once from a TOML file before any subject is scheduled, validated,
//! and then shared read-only by reference with every stage and resolver.
//!
//! ```toml
//! meg_dir    = "data/MEG"
//! study_name = "audvis"
//! subjects   = ["S1", "S2"]
//! runs       = ["01", "02"]
//! n_jobs     = 2
//!
//! [bads]
//! S2 = ["MEG001"]              # one list for every run of S2
//!
//! [bads.S1]
//! "01" = ["MEG 2443"]
//! "02" = []
//!
//! [maxfilter]
//! enabled       = true
//! reference_run = 0
//! st_duration   = 10.0
//! origin        = [0.0, 0.0, 0.04]
//!
//! [filter]
//! l_freq         = 1.0
//! h_freq         = 40.0
//! resample_sfreq = 250.0
//! ```
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::lineage::SpatialMode;
use crate::recording::ChannelKind;
use crate::spatial::HeadOrigin;

/// Configuration for the whole preprocessing pipeline.
///
/// Every field has a default, so a minimal file only needs `subjects`:
///
/// ```
/// use megprep::PipelineConfig;
///
/// let cfg = PipelineConfig::from_toml_str(r#"subjects = ["S1"]"#).unwrap();
/// assert_eq!(cfg.runs_for("S1"), &[String::new()]);
/// assert!(cfg.spatial_mode().is_enabled());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root directory holding one sub-directory per subject.
    ///
    /// Default: `data/MEG`.
    pub meg_dir: PathBuf,

    /// Study name substituted for `{study}` in [`base_fname`](Self::base_fname).
    ///
    /// Default: `audvis`.
    pub study_name: String,

    /// Filename template of every artifact, without file extension.
    ///
    /// Placeholders: `{subject}`, `{study}` and `{extension}`. The latter is
    /// required; it expands to `<run>_<stage suffix>`.
    ///
    /// Default: `{subject}_{study}{extension}`.
    pub base_fname: String,

    /// Subjects to process, in reporting order.
    pub subjects: Vec<String>,

    /// Runs of every subject, in processing order.
    ///
    /// The empty string means "the subject's single, unsegmented run".
    ///
    /// Default: `[""]`.
    pub runs: Vec<String>,

    /// Per-subject override of [`runs`](Self::runs).
    pub subject_runs: BTreeMap<String, Vec<String>>,

    /// Maximum number of subjects processed concurrently.
    ///
    /// `1` is strictly sequential; `0` uses one worker per available CPU.
    ///
    /// Default: `1`.
    pub n_jobs: usize,

    /// What the scheduler does after a subject fails.
    ///
    /// Default: [`BatchPolicy::Collect`].
    pub batch_policy: BatchPolicy,

    /// Print review tables and spectral summaries.
    ///
    /// Default: `false`.
    pub visualize: bool,

    /// Accept raw recordings acquired with internal active shielding.
    ///
    /// Such data are distorted until spatially filtered; the frequency stage
    /// refuses them regardless of this flag.
    ///
    /// Default: `false`.
    pub allow_maxshield: bool,

    /// Static bad-channel lists, keyed by subject.
    pub bads: BTreeMap<String, BadsEntry>,

    /// Channel re-typing and renaming applied after loading.
    pub channels: ChannelEdits,

    pub inspection: InspectionConfig,
    pub maxfilter: MaxfilterConfig,
    pub filter: FilterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            meg_dir: PathBuf::from("data/MEG"),
            study_name: "audvis".to_string(),
            base_fname: "{subject}_{study}{extension}".to_string(),
            subjects: vec![],
            runs: vec![String::new()],
            subject_runs: BTreeMap::new(),
            n_jobs: 1,
            batch_policy: BatchPolicy::Collect,
            visualize: false,
            allow_maxshield: false,
            bads: BTreeMap::new(),
            channels: ChannelEdits::default(),
            inspection: InspectionConfig::default(),
            maxfilter: MaxfilterConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

/// Static bad channels of one subject: either one list for all runs or a
/// list per run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BadsEntry {
    Subject(Vec<String>),
    PerRun(BTreeMap<String, Vec<String>>),
}

/// Scheduler behaviour once a subject has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// Run every subject and report every failure.
    #[default]
    Collect,
    /// Do not start further subjects after the first failure.
    FailFast,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelEdits {
    /// Channel name → new channel kind.
    pub set_types: BTreeMap<String, ChannelKind>,
    /// Old channel name → new channel name. Applied after re-typing.
    pub rename: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectionConfig {
    /// Persist an annotation artifact for every inspected run.
    ///
    /// Once written, the annotation overrides [`PipelineConfig::bads`] for
    /// that run in every later stage.
    ///
    /// Default: `false`.
    pub save_annotations: bool,

    /// Add flat data channels to the persisted bad list.
    ///
    /// Default: `false`.
    pub mark_flat: bool,

    /// Peak-to-peak amplitude at or below which a data channel is flat.
    ///
    /// Default: `1e-15`.
    pub flat_threshold: f32,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            save_annotations: false,
            mark_flat: false,
            flat_threshold: 1e-15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaxfilterConfig {
    /// Apply the spatial filter (`sss`) or pass through (`nosss`).
    ///
    /// Default: `true`.
    pub enabled: bool,

    /// Index into the subject's run list of the run whose head position
    /// every other run is aligned to.
    ///
    /// Default: `0`.
    pub reference_run: usize,

    /// Fine-calibration file of the acquisition system.
    pub calibration: Option<PathBuf>,

    /// Cross-talk compensation file of the acquisition system.
    pub cross_talk: Option<PathBuf>,

    /// Temporal window in seconds; enables the temporal extension.
    ///
    /// A 10 s window behaves much like a 0.1 Hz high-pass.
    pub st_duration: Option<f32>,

    /// Expansion origin: `"auto"` or `[x, y, z]` in metres (head frame).
    ///
    /// Default: `"auto"`.
    pub origin: HeadOrigin,
}

impl Default for MaxfilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_run: 0,
            calibration: None,
            cross_talk: None,
            st_duration: None,
            origin: HeadOrigin::Auto,
        }
    }
}

/// Band-pass and resampling parameters.
///
/// When the `[filter]` section is absent the pipeline filters 1–40 Hz.
/// Inside the section an omitted edge is disabled, so
/// `[filter] h_freq = 40.0` is a pure low-pass.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// High-pass edge in Hz.
    pub l_freq: Option<f32>,
    /// Low-pass edge in Hz.
    pub h_freq: Option<f32>,
    /// Transition bandwidth below `l_freq`; derived automatically if absent.
    pub l_trans_bandwidth: Option<f32>,
    /// Transition bandwidth above `h_freq`; derived automatically if absent.
    pub h_trans_bandwidth: Option<f32>,
    /// Target sampling rate after filtering.
    pub resample_sfreq: Option<f32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            l_freq: Some(1.0),
            h_freq: Some(40.0),
            l_trans_bandwidth: None,
            h_trans_bandwidth: None,
            resample_sfreq: None,
        }
    }
}

impl PipelineConfig {
    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let cfg: PipelineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Runs of `subject`, in processing order.
    pub fn runs_for(&self, subject: &str) -> &[String] {
        self.subject_runs
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or(&self.runs)
    }

    pub fn spatial_mode(&self) -> SpatialMode {
        SpatialMode::from_flag(self.maxfilter.enabled)
    }

    /// The designated reference run of `subject`.
    pub fn reference_run(&self, subject: &str) -> Result<&str> {
        let runs = self.runs_for(subject);
        runs.get(self.maxfilter.reference_run)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::inconsistent(format!(
                    "reference run index {} out of range for subject {subject} ({} runs)",
                    self.maxfilter.reference_run,
                    runs.len()
                ))
            })
    }

    /// Statically configured bad channels of `(subject, run)`.
    ///
    /// A non-empty `run` is looked up in the subject's per-run table; an
    /// empty `run` uses the subject-level list. A subject-level list also
    /// applies to every named run. `None` when nothing is configured.
    pub fn configured_bads(&self, subject: &str, run: &str) -> Option<BTreeSet<String>> {
        let entry = self.bads.get(subject)?;
        let list = match entry {
            BadsEntry::Subject(list) => list,
            BadsEntry::PerRun(per_run) => per_run.get(run)?,
        };
        Some(list.iter().cloned().collect())
    }

    /// Check everything that can be checked before scheduling.
    pub fn validate(&self) -> Result<()> {
        if self.subjects.is_empty() {
            return Err(Error::inconsistent("no subjects configured"));
        }
        let mut seen = HashSet::new();
        for subject in &self.subjects {
            check_subject_id(subject)?;
            if !seen.insert(subject) {
                return Err(Error::inconsistent(format!("subject {subject} listed twice")));
            }
        }
        for subject in self.subject_runs.keys() {
            if !self.subjects.contains(subject) {
                return Err(Error::inconsistent(format!(
                    "run list given for unknown subject {subject}"
                )));
            }
        }
        for subject in &self.subjects {
            let runs = self.runs_for(subject);
            if runs.is_empty() {
                return Err(Error::inconsistent(format!("subject {subject} has no runs")));
            }
            let mut seen = HashSet::new();
            for run in runs {
                check_run_id(run)?;
                if !seen.insert(run) {
                    return Err(Error::inconsistent(format!(
                        "run '{run}' listed twice for subject {subject}"
                    )));
                }
            }
            if self.maxfilter.enabled {
                self.reference_run(subject)?;
            }
        }
        for subject in self.bads.keys() {
            if !self.subjects.contains(subject) {
                log::warn!("bad channels configured for unknown subject {subject}");
            }
        }

        if !self.base_fname.contains("{extension}") {
            return Err(Error::inconsistent(
                "base_fname must contain the {extension} placeholder",
            ));
        }
        if self.base_fname.contains(['/', '\\']) {
            return Err(Error::inconsistent("base_fname must be a plain file name"));
        }

        if let Some(d) = self.maxfilter.st_duration {
            if !(d > 0.0) {
                return Err(Error::inconsistent(format!("st_duration must be positive, got {d}")));
            }
        }
        if !(self.inspection.flat_threshold >= 0.0) {
            return Err(Error::inconsistent("flat_threshold must be non-negative"));
        }
        self.filter.validate()
    }
}

impl FilterConfig {
    fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: Option<f32>| match v {
            Some(v) if !(v > 0.0) => Err(Error::inconsistent(format!(
                "{name} must be positive, got {v}"
            ))),
            _ => Ok(()),
        };
        positive("l_freq", self.l_freq)?;
        positive("h_freq", self.h_freq)?;
        positive("l_trans_bandwidth", self.l_trans_bandwidth)?;
        positive("h_trans_bandwidth", self.h_trans_bandwidth)?;
        positive("resample_sfreq", self.resample_sfreq)?;
        if let (Some(l), Some(h)) = (self.l_freq, self.h_freq) {
            if l >= h {
                return Err(Error::inconsistent(format!(
                    "l_freq ({l} Hz) must be below h_freq ({h} Hz)"
                )));
            }
        }
        Ok(())
    }
}

fn check_subject_id(subject: &str) -> Result<()> {
    if subject.is_empty()
        || subject == "."
        || subject == ".."
        || subject.contains(['/', '\\'])
    {
        return Err(Error::inconsistent(format!("invalid subject identifier '{subject}'")));
    }
    Ok(())
}

/// Runs may only use ASCII alphanumerics and `-`. An `_` would let
/// `<run>_<suffix>` collide across runs and stages.
fn check_run_id(run: &str) -> Result<()> {
    if !run.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::inconsistent(format!(
            "invalid run identifier '{run}' (use letters, digits and '-')"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SUBJECTS: &str = r#"
        subjects = ["S1", "S2"]
        runs = ["01", "02"]

        [bads]
        S2 = ["MEG001"]

        [bads.S1]
        "01" = ["MEG 2443", "EEG 053"]
    "#;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = PipelineConfig::from_toml_str(r#"subjects = ["S1"]"#).unwrap();
        assert_eq!(cfg.n_jobs, 1);
        assert_eq!(cfg.filter, FilterConfig::default());
        assert_eq!(cfg.maxfilter.origin, HeadOrigin::Auto);
        assert_eq!(cfg.batch_policy, BatchPolicy::Collect);
    }

    #[test]
    fn per_run_and_subject_level_bads() {
        let cfg = PipelineConfig::from_toml_str(TWO_SUBJECTS).unwrap();
        let s1: Vec<_> = cfg.configured_bads("S1", "01").unwrap().into_iter().collect();
        assert_eq!(s1, ["EEG 053", "MEG 2443"]);
        assert_eq!(cfg.configured_bads("S1", "02"), None);
        let s2 = cfg.configured_bads("S2", "02").unwrap();
        assert!(s2.contains("MEG001") && s2.len() == 1);
        assert_eq!(cfg.configured_bads("S3", ""), None);
    }

    #[test]
    fn filter_section_disables_omitted_edges() {
        let cfg = PipelineConfig::from_toml_str(
            "subjects = [\"S1\"]\n[filter]\nh_freq = 40.0\n",
        )
        .unwrap();
        assert_eq!(cfg.filter.l_freq, None);
        assert_eq!(cfg.filter.h_freq, Some(40.0));
    }

    #[test]
    fn reference_run_out_of_range_is_inconsistent() {
        let err = PipelineConfig::from_toml_str(
            "subjects = [\"S1\"]\nruns = [\"01\"]\n[maxfilter]\nreference_run = 3\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInconsistency(_)), "{err}");
    }

    #[test]
    fn reference_run_ignored_when_disabled() {
        let cfg = PipelineConfig::from_toml_str(
            "subjects = [\"S1\"]\n[maxfilter]\nenabled = false\nreference_run = 3\n",
        )
        .unwrap();
        assert_eq!(cfg.spatial_mode(), SpatialMode::Disabled);
    }

    #[test]
    fn subject_run_override_is_checked_against_reference() {
        let err = PipelineConfig::from_toml_str(
            r#"
            subjects = ["S1", "S2"]
            runs = ["01", "02"]
            [subject_runs]
            S2 = ["01"]
            [maxfilter]
            reference_run = 1
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("S2"), "{err}");
    }

    #[test]
    fn rejects_underscore_in_run() {
        let err = PipelineConfig::from_toml_str("subjects = [\"S1\"]\nruns = [\"a_sss\"]\n")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInconsistency(_)));
    }

    #[test]
    fn rejects_template_without_extension() {
        let err = PipelineConfig::from_toml_str(
            "subjects = [\"S1\"]\nbase_fname = \"{subject}_raw\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("{extension}"));
    }

    #[test]
    fn rejects_inverted_band() {
        let err = PipelineConfig::from_toml_str(
            "subjects = [\"S1\"]\n[filter]\nl_freq = 40.0\nh_freq = 1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInconsistency(_)));
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        let err = PipelineConfig::from_toml_str("subjects = [\"S1\"]\nuse_maxwell = 1\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn parses_fail_fast_policy_and_channel_edits() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            subjects = ["S1"]
            batch_policy = "fail-fast"
            [channels.set_types]
            "EEG 061" = "eog"
            [channels.rename]
            "EEG 061" = "HEOG"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.batch_policy, BatchPolicy::FailFast);
        assert_eq!(cfg.channels.set_types["EEG 061"], ChannelKind::Eog);
        assert_eq!(cfg.channels.rename["EEG 061"], "HEOG");
    }
}
