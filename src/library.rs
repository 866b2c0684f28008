//! The signal-processing backend used by the stages.
//!
//! Stages never touch samples directly: loading, saving, channel edits,
//! spatial filtering, band-pass filtering and resampling all go through
//! [`SignalLibrary`]. [`NativeLibrary`] implements it with the DSP in this
//! crate; other backends (or test doubles) can be swapped in.
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::filter::{apply_fir_zero_phase, design_filter, FilterEdges};
use crate::recording::{self, ChannelKind, HeadTransform, Recording};
use crate::resample::Resampler;
use crate::spatial::{self, MaxwellParams};

/// Band-pass request; `None` bandwidths are derived automatically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPass {
    pub l_freq: Option<f32>,
    pub h_freq: Option<f32>,
    pub l_trans_bandwidth: Option<f32>,
    pub h_trans_bandwidth: Option<f32>,
}

pub trait SignalLibrary: Send + Sync {
    /// Load a recording with its samples.
    ///
    /// Recordings acquired with active shielding are rejected unless
    /// `allow_maxshield` is set.
    fn load(&self, path: &Path, allow_maxshield: bool) -> Result<Recording>;

    /// Read the head position of a recording without loading its samples.
    fn read_head_position(&self, path: &Path) -> Result<Option<HeadTransform>>;

    /// Write a recording, replacing any existing file at `path`.
    fn save(&self, rec: &Recording, path: &Path) -> Result<()>;

    fn set_channel_types(
        &self,
        rec: &mut Recording,
        types: &BTreeMap<String, ChannelKind>,
    ) -> Result<()>;

    /// Rename channels; bad-channel labels follow the rename.
    fn rename_channels(&self, rec: &mut Recording, names: &BTreeMap<String, String>)
        -> Result<()>;

    /// Normalize legacy magnetometer coil types. Returns how many changed.
    fn fix_mag_coil_types(&self, rec: &mut Recording) -> usize;

    fn maxwell_filter(&self, rec: &Recording, params: &MaxwellParams) -> Result<Recording>;

    /// Zero-phase FIR band-pass of the data channels.
    fn band_pass(&self, rec: &mut Recording, band: &BandPass) -> Result<()>;

    fn resample(&self, rec: &mut Recording, sfreq: f32) -> Result<()>;
}

/// [`SignalLibrary`] backed by this crate's DSP and safetensors storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLibrary;

impl SignalLibrary for NativeLibrary {
    fn load(&self, path: &Path, allow_maxshield: bool) -> Result<Recording> {
        let rec = Recording::load(path)?;
        if rec.info.maxshield && !allow_maxshield {
            return Err(Error::format(
                path,
                "recorded with internal active shielding (MaxShield); \
                 spatially filter it or set allow_maxshield",
            ));
        }
        Ok(rec)
    }

    fn read_head_position(&self, path: &Path) -> Result<Option<HeadTransform>> {
        Ok(recording::read_info(path)?.dev_head_t)
    }

    fn save(&self, rec: &Recording, path: &Path) -> Result<()> {
        rec.save(path)
    }

    fn set_channel_types(
        &self,
        rec: &mut Recording,
        types: &BTreeMap<String, ChannelKind>,
    ) -> Result<()> {
        for (name, &kind) in types {
            let idx = rec.info.channel_index(name).ok_or_else(|| {
                Error::inconsistent(format!("cannot re-type unknown channel '{name}'"))
            })?;
            rec.info.channels[idx].kind = kind;
        }
        Ok(())
    }

    fn rename_channels(
        &self,
        rec: &mut Recording,
        names: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut indices = Vec::with_capacity(names.len());
        for (old, new) in names {
            let idx = rec.info.channel_index(old).ok_or_else(|| {
                Error::inconsistent(format!("cannot rename unknown channel '{old}'"))
            })?;
            indices.push((idx, new));
        }
        for (idx, new) in indices {
            rec.info.channels[idx].name = new.clone();
        }
        let mut seen = HashSet::new();
        if let Some(dup) = rec.info.channels.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(Error::inconsistent(format!(
                "renaming produces duplicate channel '{}'",
                dup.name
            )));
        }
        for bad in rec.info.bads.iter_mut() {
            if let Some(new) = names.get(bad.as_str()) {
                *bad = new.clone();
            }
        }
        rec.info.bads.sort();
        Ok(())
    }

    fn fix_mag_coil_types(&self, rec: &mut Recording) -> usize {
        spatial::fix_mag_coil_types(rec)
    }

    fn maxwell_filter(&self, rec: &Recording, params: &MaxwellParams) -> Result<Recording> {
        Ok(spatial::maxwell_filter(rec, params)?)
    }

    fn band_pass(&self, rec: &mut Recording, band: &BandPass) -> Result<()> {
        let sfreq = rec.info.sfreq;
        let edges = FilterEdges::resolve(
            band.l_freq,
            band.h_freq,
            band.l_trans_bandwidth,
            band.h_trans_bandwidth,
            sfreq,
        )?;
        let Some(h) = design_filter(&edges, sfreq) else {
            return Ok(());
        };
        // Bad channels are filtered too, as MNE does for data picks.
        let picks: Vec<usize> = rec
            .info
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_data())
            .map(|(i, _)| i)
            .collect();
        apply_fir_zero_phase(&mut rec.data, &h, &picks)?;

        if let Some((l, _)) = edges.low {
            rec.info.highpass = Some(rec.info.highpass.map_or(l, |hp| hp.max(l)));
        }
        if let Some((hf, _)) = edges.high {
            rec.info.lowpass = Some(rec.info.lowpass.map_or(hf, |lp| lp.min(hf)));
        }
        rec.info.history.push(format!(
            "band-pass: l_freq={:?} h_freq={:?} taps={} window=hamming phase=zero",
            edges.low.map(|e| e.0),
            edges.high.map(|e| e.0),
            h.len()
        ));
        Ok(())
    }

    fn resample(&self, rec: &mut Recording, sfreq: f32) -> Result<()> {
        let src = rec.info.sfreq;
        if (src - sfreq).abs() < 1e-6 {
            return Ok(());
        }
        let plan = Resampler::new(rec.n_times(), src, sfreq)?;
        let mut out = ndarray::Array2::<f32>::zeros((rec.data.nrows(), plan.output_len()));
        for (mut dst, row) in out.rows_mut().into_iter().zip(rec.data.rows()) {
            let resampled = plan.process(&row.to_vec())?;
            dst.assign(&ndarray::ArrayView1::from(&resampled));
        }
        rec.data = out;
        rec.info.sfreq = sfreq;
        let nyq = sfreq / 2.0;
        rec.info.lowpass = Some(rec.info.lowpass.map_or(nyq, |lp| lp.min(nyq)));
        rec.info.history.push(format!("resample: {src} Hz -> {sfreq} Hz"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::StageTag;
    use crate::recording::{ChannelInfo, RecordingInfo};
    use ndarray::Array2;

    fn rec() -> Recording {
        let kinds = [ChannelKind::Mag, ChannelKind::Eeg, ChannelKind::Stim];
        let channels = ["MEG 0111", "EEG 061", "STI 014"]
            .iter()
            .zip(kinds)
            .map(|(n, kind)| ChannelInfo {
                name: n.to_string(),
                kind,
                coil_type: 3012,
                loc: [0.0; 12],
            })
            .collect();
        Recording {
            info: RecordingInfo {
                sfreq: 500.0,
                channels,
                bads: vec!["EEG 061".into()],
                dev_head_t: None,
                maxshield: false,
                stage: StageTag::Raw,
                spatial_mode: None,
                highpass: None,
                lowpass: None,
                history: vec![],
            },
            data: Array2::from_elem((3, 2000), 1.0),
        }
    }

    #[test]
    fn rename_carries_bads_along() {
        let mut r = rec();
        let names = BTreeMap::from([("EEG 061".to_string(), "HEOG".to_string())]);
        NativeLibrary.rename_channels(&mut r, &names).unwrap();
        assert_eq!(r.info.channels[1].name, "HEOG");
        assert_eq!(r.info.bads, vec!["HEOG".to_string()]);
    }

    #[test]
    fn rename_rejects_unknown_and_duplicates() {
        let mut r = rec();
        let unknown = BTreeMap::from([("EEG 999".to_string(), "X".to_string())]);
        assert!(NativeLibrary.rename_channels(&mut r, &unknown).is_err());
        let dup = BTreeMap::from([("EEG 061".to_string(), "STI 014".to_string())]);
        assert!(NativeLibrary.rename_channels(&mut r, &dup).is_err());
    }

    #[test]
    fn retype_changes_kind() {
        let mut r = rec();
        let types = BTreeMap::from([("EEG 061".to_string(), ChannelKind::Eog)]);
        NativeLibrary.set_channel_types(&mut r, &types).unwrap();
        assert_eq!(r.info.channels[1].kind, ChannelKind::Eog);
    }

    #[test]
    fn band_pass_leaves_stim_alone_and_records_edges() {
        let mut r = rec();
        let band = BandPass {
            l_freq: Some(1.0),
            h_freq: Some(40.0),
            l_trans_bandwidth: None,
            h_trans_bandwidth: None,
        };
        NativeLibrary.band_pass(&mut r, &band).unwrap();
        assert!(r.data.row(2).iter().all(|&v| v == 1.0));
        // DC removed from data channels.
        assert!(r.data[[0, 1000]].abs() < 1e-2);
        assert_eq!(r.info.highpass, Some(1.0));
        assert_eq!(r.info.lowpass, Some(40.0));
    }

    #[test]
    fn resample_updates_rate_and_length() {
        let mut r = rec();
        NativeLibrary.resample(&mut r, 250.0).unwrap();
        assert_eq!(r.info.sfreq, 250.0);
        assert_eq!(r.n_times(), 1000);
        assert_eq!(r.info.lowpass, Some(125.0));
    }

    #[test]
    fn maxshield_needs_permission() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ms_raw.safetensors");
        let mut r = rec();
        r.info.maxshield = true;
        r.save(&path).unwrap();
        assert!(NativeLibrary.load(&path, false).is_err());
        assert!(NativeLibrary.load(&path, true).is_ok());
    }
}
