use crate::annotations::Annotations;
use crate::error::Result;
use crate::lineage::StageTag;
use crate::recording::{ChannelKind, Recording};

use super::{expect_stage, Pipeline};

/// Summary statistics of one channel, shown during inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReview {
    pub name: String,
    pub kind: ChannelKind,
    pub bad: bool,
    pub rms: f32,
    pub peak_to_peak: f32,
}

/// Per-channel review statistics of a recording.
pub fn review(rec: &Recording) -> Vec<ChannelReview> {
    rec.info
        .channels
        .iter()
        .zip(rec.data.rows())
        .map(|(ch, row)| {
            let n = row.len().max(1) as f64;
            let rms = (row.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / n).sqrt();
            let (lo, hi) = row
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            ChannelReview {
                name: ch.name.clone(),
                kind: ch.kind,
                bad: rec.info.is_bad(&ch.name),
                rms: rms as f32,
                peak_to_peak: if row.is_empty() { 0.0 } else { hi - lo },
            }
        })
        .collect()
}

fn print_review(subject: &str, run: &str, rows: &[ChannelReview]) {
    println!("── {subject} run '{run}' ──────────────────────────────");
    println!("{:<16} {:<5} {:>4} {:>12} {:>12}", "channel", "kind", "bad", "rms", "ptp");
    for r in rows {
        println!(
            "{:<16} {:<5} {:>4} {:>12.4e} {:>12.4e}",
            r.name,
            format!("{:?}", r.kind).to_lowercase(),
            if r.bad { "x" } else { "" },
            r.rms,
            r.peak_to_peak
        );
    }
}

impl Pipeline<'_> {
    /// Load every raw run of `subject`, attach bad channels and channel
    /// edits, and present it for review.
    pub fn inspect(&self, subject: &str) -> Result<usize> {
        let cfg = self.config;
        let mut n_inspected = 0;
        for run in cfg.runs_for(subject) {
            let Some(path) = self.existing_input(subject, run, StageTag::Raw) else {
                continue;
            };
            log::info!("Inspecting {}", path.display());
            let mut raw = self.library.load(&path, cfg.allow_maxshield)?;
            expect_stage(&raw, StageTag::Raw, &path)?;
            let acquired: Vec<String> = raw.info.channels.iter().map(|c| c.name.clone()).collect();
            let mut bads = self.prepare(&mut raw, subject, run)?;

            let rows = review(&raw);
            log::info!(
                "{} channels ({} bad), {:.1} s at {} Hz",
                rows.len(),
                raw.info.bads.len(),
                raw.n_times() as f32 / raw.info.sfreq,
                raw.info.sfreq
            );
            if cfg.visualize {
                print_review(subject, run, &rows);
            }

            if cfg.inspection.save_annotations {
                // Annotations use acquisition names, like the configured bads.
                if cfg.inspection.mark_flat {
                    let flat = rows.iter().zip(&acquired).filter(|(r, _)| {
                        r.kind.is_data() && !r.bad && r.peak_to_peak <= cfg.inspection.flat_threshold
                    });
                    for (r, name) in flat {
                        log::info!("{}: flat (ptp {:e}), marking bad", r.name, r.peak_to_peak);
                        bads.insert(name.clone());
                    }
                }
                let out = self.runs.resolve(subject, run, StageTag::Annotations);
                Annotations::new(bads).save(&out)?;
                log::info!("Annotations written to {}", out.display());
            }
            n_inspected += 1;
        }
        if n_inspected == 0 {
            return Err(self.no_runs(subject, StageTag::Raw));
        }
        Ok(n_inspected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{ChannelInfo, RecordingInfo};
    use ndarray::array;

    #[test]
    fn review_reports_rms_and_ptp() {
        let channels = ["A", "B"]
            .iter()
            .map(|n| ChannelInfo {
                name: n.to_string(),
                kind: ChannelKind::Grad,
                coil_type: 3012,
                loc: [0.0; 12],
            })
            .collect();
        let rec = Recording {
            info: RecordingInfo {
                sfreq: 100.0,
                channels,
                bads: vec!["B".into()],
                dev_head_t: None,
                maxshield: false,
                stage: StageTag::Raw,
                spatial_mode: None,
                highpass: None,
                lowpass: None,
                history: vec![],
            },
            data: array![[3.0, -3.0, 3.0, -3.0], [0.0, 0.0, 0.0, 0.0]],
        };
        let rows = review(&rec);
        approx::assert_abs_diff_eq!(rows[0].rms, 3.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(rows[0].peak_to_peak, 6.0);
        assert!(!rows[0].bad);
        assert!(rows[1].bad);
        assert_eq!(rows[1].peak_to_peak, 0.0);
    }
}
