//! # megprep — batch MEG preprocessing
//!
//! `megprep` runs a study's MEG recordings through three stages, one
//! subject at a time (or several in parallel), one run after another:
//!
//! ```text
//! <meg_dir>/<subject>/<subject>_<study><run>_raw.safetensors
//!   │
//!   ├─ inspect     attach bad channels, re-type/rename, review
//!   │                └─→ <run>_annotations.json   (optional)
//!   ├─ maxfilter   coil-type fix, spatial filter aligned to the reference run
//!   │                └─→ <run>_sss_raw   (enabled)  |  <run>_nosss_raw  (disabled)
//!   └─ filter      zero-phase FIR band-pass, then resample
//!                    └─→ <run>_filt_raw
//! ```
//!
//! Artifact paths come from [`RunResolver`] only. Every recording records
//! the stage and spatial mode that produced it, so a later stage run with a
//! different `maxfilter.enabled` fails with
//! [`Error::ConfigurationInconsistency`] instead of reading the wrong files.
//!
//! ## Quick start
//!
//! ```no_run
//! use megprep::{run_stage, NativeLibrary, PipelineConfig, Stage};
//!
//! let cfg = PipelineConfig::load("megprep.toml".as_ref()).unwrap();
//! for stage in [Stage::Inspect, Stage::Maxfilter, Stage::Filter] {
//!     let report = run_stage(&cfg, &NativeLibrary, stage).unwrap();
//!     for failure in &report.failed {
//!         eprintln!("{failure}");
//!     }
//! }
//! ```
//!
//! ## Using the DSP directly
//!
//! ```no_run
//! use megprep::filter::{apply_fir_zero_phase, design_filter, FilterEdges};
//! use megprep::resample::resample;
//! use ndarray::Array2;
//!
//! let mut data: Array2<f32> = Array2::zeros((306, 60_000)); // [C, T] @ 1000 Hz
//! let picks: Vec<usize> = (0..306).collect();
//!
//! let edges = FilterEdges::resolve(Some(1.0), Some(40.0), None, None, 1000.0).unwrap();
//! let h = design_filter(&edges, 1000.0).unwrap();
//! apply_fir_zero_phase(&mut data, &h, &picks).unwrap();
//!
//! let data = resample(&data, 1000.0, 250.0).unwrap();
//! ```

pub mod alignment;
pub mod annotations;
pub mod bads;
pub mod config;
pub mod error;
pub mod filter;
pub mod library;
pub mod lineage;
pub mod recording;
pub mod resample;
pub mod resolver;
pub mod scheduler;
pub mod spatial;
pub mod stages;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config
pub use config::{BadsEntry, BatchPolicy, PipelineConfig};

// errors
pub use error::{Error, Result, SubjectFailure};

// artifacts and lineage
pub use annotations::Annotations;
pub use lineage::{SpatialMode, StageTag};
pub use recording::{ChannelInfo, ChannelKind, HeadTransform, Recording, RecordingInfo};
pub use resolver::RunResolver;

// resolution
pub use alignment::ReferenceAlignment;
pub use bads::{BadChannelResolver, BadsSource, ResolvedBads};

// backend
pub use library::{BandPass, NativeLibrary, SignalLibrary};
pub use spatial::{HeadOrigin, MaxwellParams};

// orchestration
pub use scheduler::{run_all, BatchReport};
pub use stages::{Pipeline, Stage};

/// Run one stage for every configured subject.
///
/// Concurrency and the failure policy come from `config.n_jobs` and
/// `config.batch_policy`. Per-subject failures are returned in the report;
/// the `Err` case is reserved for failing to start the workers.
pub fn run_stage(
    config: &PipelineConfig,
    library: &dyn SignalLibrary,
    stage: Stage,
) -> Result<BatchReport> {
    let pipeline = Pipeline::new(config, library);
    log::info!(
        "{stage}: {} subject(s), n_jobs = {}",
        config.subjects.len(),
        config.n_jobs
    );
    run_all(
        &config.subjects,
        |subject| pipeline.run_stage(stage, subject),
        config.n_jobs,
        config.batch_policy,
    )
}
