use crate::alignment::ReferenceAlignment;
use crate::error::Result;
use crate::lineage::{SpatialMode, StageTag};
use crate::spatial::MaxwellParams;

use super::{expect_stage, Pipeline};

impl Pipeline<'_> {
    /// Spatially filter every raw run of `subject` (`sss`), or pass it
    /// through unchanged when the filter is disabled (`nosss`).
    pub fn spatial_filter(&self, subject: &str) -> Result<usize> {
        let cfg = self.config;
        let mode = cfg.spatial_mode();
        let out_tag = mode.output_tag();
        let mut alignment = ReferenceAlignment::new(cfg, &self.runs, self.library, subject);

        let mut n_raws = 0;
        for run in cfg.runs_for(subject) {
            let Some(raw_path) = self.existing_input(subject, run, StageTag::Raw) else {
                continue;
            };
            let out_path = self.runs.resolve(subject, run, out_tag);
            log::info!("Input: {}", raw_path.display());
            log::info!("Output: {}", out_path.display());

            let mut raw = self.library.load(&raw_path, cfg.allow_maxshield)?;
            expect_stage(&raw, StageTag::Raw, &raw_path)?;
            self.prepare(&mut raw, subject, run)?;
            let n_fixed = self.library.fix_mag_coil_types(&mut raw);
            if n_fixed > 0 {
                log::debug!("{n_fixed} magnetometer coil type(s) normalized");
            }

            let mut out = match mode {
                SpatialMode::Enabled => {
                    let params = MaxwellParams {
                        calibration: cfg.maxfilter.calibration.clone(),
                        cross_talk: cfg.maxfilter.cross_talk.clone(),
                        st_duration: cfg.maxfilter.st_duration,
                        origin: cfg.maxfilter.origin,
                        destination: Some(alignment.destination()?),
                    };
                    self.library.maxwell_filter(&raw, &params)?
                }
                SpatialMode::Disabled => {
                    log::warn!(
                        "Not applying Maxwell filter to {subject} run '{run}'. If you acquired \
                         data with active shielding (MaxShield), your results will be distorted; \
                         the filter stage will refuse such data."
                    );
                    raw
                }
            };
            out.info.stage = out_tag;
            out.info.spatial_mode = Some(mode);
            self.library.save(&out, &out_path)?;
            n_raws += 1;
        }
        if n_raws == 0 {
            return Err(self.no_runs(subject, StageTag::Raw));
        }
        Ok(n_raws)
    }
}
