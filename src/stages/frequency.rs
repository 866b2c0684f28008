use crate::error::{Error, Result};
use crate::library::BandPass;
use crate::lineage::{SpatialMode, StageTag};
use crate::recording::{ChannelKind, Recording};

use super::{expect_stage, warn_missing, Pipeline};

impl Pipeline<'_> {
    /// Band-pass (then optionally resample) the spatial stage's output of
    /// every run of `subject`.
    pub fn frequency_filter(&self, subject: &str) -> Result<usize> {
        let cfg = self.config;
        let mode = cfg.spatial_mode();
        let in_tag = mode.output_tag();
        let other_tag = match mode {
            SpatialMode::Enabled => StageTag::NoSss,
            SpatialMode::Disabled => StageTag::Sss,
        };
        let band = BandPass {
            l_freq: cfg.filter.l_freq,
            h_freq: cfg.filter.h_freq,
            l_trans_bandwidth: cfg.filter.l_trans_bandwidth,
            h_trans_bandwidth: cfg.filter.h_trans_bandwidth,
        };

        let mut n_filtered = 0;
        for run in cfg.runs_for(subject) {
            let in_path = self.runs.resolve(subject, run, in_tag);
            if !in_path.is_file() {
                let other = self.runs.resolve(subject, run, other_tag);
                if other.is_file() {
                    return Err(Error::inconsistent(format!(
                        "found {} but maxfilter.enabled = {}; re-run the maxfilter stage \
                         or fix the configuration",
                        other.display(),
                        mode.is_enabled()
                    )));
                }
                warn_missing(subject, run, in_path);
                continue;
            }
            let out_path = self.runs.resolve(subject, run, StageTag::Filt);
            log::info!("Input: {}", in_path.display());
            log::info!("Output: {}", out_path.display());

            let mut rec = self.library.load(&in_path, false)?;
            expect_stage(&rec, in_tag, &in_path)?;
            if rec.info.spatial_mode != Some(mode) {
                return Err(Error::inconsistent(format!(
                    "{} was produced with spatial mode {}, configuration says {mode}",
                    in_path.display(),
                    rec.info
                        .spatial_mode
                        .map_or_else(|| "unknown".to_string(), |m| m.to_string()),
                )));
            }

            let before = cfg.visualize.then(|| data_rms(&rec));
            self.library.band_pass(&mut rec, &band)?;
            if let Some(sfreq) = cfg.filter.resample_sfreq {
                self.library.resample(&mut rec, sfreq)?;
            }
            if let Some(before) = before {
                log::info!(
                    "{subject} run '{run}': data RMS {before:.3e} -> {:.3e} \
                     (band {:?}-{:?} Hz, {} Hz)",
                    data_rms(&rec),
                    rec.info.highpass,
                    rec.info.lowpass,
                    rec.info.sfreq
                );
            }

            rec.info.stage = StageTag::Filt;
            self.library.save(&rec, &out_path)?;
            n_filtered += 1;
        }
        if n_filtered == 0 {
            return Err(self.no_runs(subject, in_tag));
        }
        Ok(n_filtered)
    }
}

/// RMS over all good MEG and EEG channels.
fn data_rms(rec: &Recording) -> f64 {
    let picks = rec.info.good_picks(ChannelKind::is_data);
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for &ch in &picks {
        for &v in rec.data.row(ch) {
            sum += (v as f64) * (v as f64);
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).sqrt()
    }
}
