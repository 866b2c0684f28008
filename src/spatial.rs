//! Native spatial filter.
//!
//! A compact stand-in for signal-space separation, enough to run the
//! pipeline end to end without an external toolbox:
//!
//! 1. The field common to all good MEG sensors is removed at every time
//!    point (`data[c, t] -= mean(data[good_meg, t])`), which suppresses
//!    distant, spatially uniform interference.
//! 2. With a temporal window `st_duration`, slow drifts are removed with a
//!    zero-phase high-pass at `1 / st_duration` Hz.
//! 3. The recording is re-expressed in the destination head frame.
//!
//! The full multipole expansion belongs behind
//! [`SignalLibrary::maxwell_filter`](crate::library::SignalLibrary::maxwell_filter).
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2, Axis};
use serde::Deserialize;

use crate::filter::{apply_fir_zero_phase, design_highpass, FilterEdges};
use crate::recording::{
    ChannelKind, HeadTransform, Recording, COIL_VV_MAG_T1, COIL_VV_MAG_T2, COIL_VV_MAG_T3,
};

/// Origin of the spatial expansion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(try_from = "OriginRepr")]
pub enum HeadOrigin {
    /// Fit the origin to the head digitization.
    #[default]
    Auto,
    /// Fixed point in head coordinates, metres.
    Fixed([f64; 3]),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OriginRepr {
    Keyword(String),
    Point([f64; 3]),
}

impl TryFrom<OriginRepr> for HeadOrigin {
    type Error = String;

    fn try_from(repr: OriginRepr) -> std::result::Result<Self, String> {
        match repr {
            OriginRepr::Keyword(k) if k == "auto" => Ok(HeadOrigin::Auto),
            OriginRepr::Keyword(k) => Err(format!("origin must be \"auto\" or [x, y, z], got \"{k}\"")),
            OriginRepr::Point(p) => Ok(HeadOrigin::Fixed(p)),
        }
    }
}

/// Inputs of the spatial filter besides the recording itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxwellParams {
    pub calibration: Option<PathBuf>,
    pub cross_talk: Option<PathBuf>,
    pub st_duration: Option<f32>,
    pub origin: HeadOrigin,
    /// Head position all runs are re-expressed in.
    pub destination: Option<HeadTransform>,
}

/// Apply the native spatial filter and return the corrected recording.
pub fn maxwell_filter(raw: &Recording, params: &MaxwellParams) -> Result<Recording> {
    for (what, file) in [("calibration", &params.calibration), ("cross-talk", &params.cross_talk)] {
        if let Some(path) = file {
            check_readable(what, path)?;
        }
    }

    let mut out = raw.clone();
    let meg = out.info.good_picks(ChannelKind::is_meg);
    if meg.is_empty() {
        bail!("no good MEG channels to filter");
    }
    remove_common_mode(&mut out.data, &meg);

    if let Some(st) = params.st_duration {
        let sfreq = out.info.sfreq;
        FilterEdges::resolve(Some(1.0 / st), None, None, None, sfreq)
            .with_context(|| format!("st_duration {st} s is too short for {sfreq} Hz data"))?;
        let h = design_highpass(1.0 / st, sfreq);
        apply_fir_zero_phase(&mut out.data, &h, &meg)?;
    }

    if let Some(dest) = params.destination {
        out.info.dev_head_t = Some(dest);
    }
    out.info.maxshield = false;
    out.info.history.push(describe(params));
    Ok(out)
}

/// Subtract, at each time point, the mean over the channels in `picks`
/// from those same channels.
///
/// Matches `raw.set_eeg_reference('average', projection=False)` restricted
/// to `picks`.
pub fn remove_common_mode(data: &mut Array2<f32>, picks: &[usize]) {
    if picks.is_empty() {
        return;
    }
    let mut mean = Array1::<f32>::zeros(data.ncols());
    for &ch in picks {
        mean += &data.row(ch);
    }
    mean /= picks.len() as f32;
    for &ch in picks {
        let mut row = data.index_axis_mut(Axis(0), ch);
        row -= &mean;
    }
}

/// Replace legacy magnetometer coil types (T1/T2) with T3.
///
/// Returns the number of channels changed; a second call changes nothing.
pub fn fix_mag_coil_types(rec: &mut Recording) -> usize {
    let mut n_fixed = 0;
    for ch in rec.info.channels.iter_mut() {
        if ch.kind == ChannelKind::Mag
            && (ch.coil_type == COIL_VV_MAG_T1 || ch.coil_type == COIL_VV_MAG_T2)
        {
            ch.coil_type = COIL_VV_MAG_T3;
            n_fixed += 1;
        }
    }
    n_fixed
}

fn check_readable(what: &str, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("{what} file not found: {}", path.display());
    }
    Ok(())
}

fn describe(params: &MaxwellParams) -> String {
    let origin = match params.origin {
        HeadOrigin::Auto => "auto".to_string(),
        HeadOrigin::Fixed([x, y, z]) => format!("[{x}, {y}, {z}]"),
    };
    let st = params
        .st_duration
        .map(|d| format!("{d} s"))
        .unwrap_or_else(|| "off".to_string());
    format!(
        "spatial filter: origin={origin} st_duration={st} calibration={} cross_talk={} aligned={}",
        params.calibration.is_some(),
        params.cross_talk.is_some(),
        params.destination.is_some(),
    )
}
