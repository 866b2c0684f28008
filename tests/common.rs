/// Shared helpers: synthetic recordings and throwaway study directories.
use megprep::recording::COIL_VV_MAG_T1;
use megprep::{
    ChannelInfo, ChannelKind, HeadTransform, PipelineConfig, Recording, RecordingInfo, RunResolver,
    StageTag,
};
use ndarray::Array2;
use std::f32::consts::PI;
use std::path::PathBuf;
use tempfile::TempDir;

pub const SFREQ: f32 = 200.0;
pub const N_TIMES: usize = 2000;

/// A study directory that lives as long as the value.
pub struct Study {
    pub dir: TempDir,
    pub config: PipelineConfig,
}

#[allow(unused)]
impl Study {
    /// Parse `toml` and point `meg_dir` into a fresh temporary directory.
    pub fn new(toml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::from_toml_str(toml).unwrap();
        config.meg_dir = dir.path().join("MEG");
        Study { dir, config }
    }

    pub fn resolver(&self) -> RunResolver {
        RunResolver::from_config(&self.config)
    }

    pub fn path(&self, subject: &str, run: &str, tag: StageTag) -> PathBuf {
        self.resolver().resolve(subject, run, tag)
    }

    /// Write a raw recording for `(subject, run)`.
    pub fn write_raw(&self, subject: &str, run: &str, rec: &Recording) -> PathBuf {
        let path = self.path(subject, run, StageTag::Raw);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        rec.save(&path).unwrap();
        path
    }
}

/// Head position shifted by `dz` metres along z.
#[allow(unused)]
pub fn head_at(dz: f64) -> HeadTransform {
    let mut t = HeadTransform::identity();
    t.translation = [0.0, 0.0, 0.04 + dz];
    t
}

/// Eight-channel recording: four gradiometers, two legacy-coil
/// magnetometers, one EEG and one trigger channel.
///
/// Every MEG channel carries a shared 0.3 Hz drift plus a 10 Hz and a 60 Hz
/// component; the trigger channel is a step.
#[allow(unused)]
pub fn synthetic_raw(head: HeadTransform) -> Recording {
    let layout = [
        ("MEG 0112", ChannelKind::Grad, 3012),
        ("MEG 0113", ChannelKind::Grad, 3012),
        ("MEG 0122", ChannelKind::Grad, 3012),
        ("MEG 0123", ChannelKind::Grad, 3012),
        ("MEG 0111", ChannelKind::Mag, COIL_VV_MAG_T1),
        ("MEG 0121", ChannelKind::Mag, COIL_VV_MAG_T1),
        ("EEG 061", ChannelKind::Eeg, 1),
        ("STI 014", ChannelKind::Stim, 0),
    ];
    let channels = layout
        .iter()
        .enumerate()
        .map(|(i, &(name, kind, coil_type))| {
            let mut loc = [0.0f32; 12];
            loc[0] = 0.01 * i as f32;
            ChannelInfo {
                name: name.to_string(),
                kind,
                coil_type,
                loc,
            }
        })
        .collect();
    let data = Array2::from_shape_fn((layout.len(), N_TIMES), |(c, t)| {
        let ts = t as f32 / SFREQ;
        if layout[c].1 == ChannelKind::Stim {
            return if t >= N_TIMES / 2 { 5.0 } else { 0.0 };
        }
        let phase = c as f32 * 0.3;
        1e-12 * (3.0 * (2.0 * PI * 0.3 * ts).sin()
            + (2.0 * PI * 10.0 * ts + phase).sin()
            + 0.5 * (2.0 * PI * 60.0 * ts).sin())
    });
    Recording {
        info: RecordingInfo {
            sfreq: SFREQ,
            channels,
            bads: vec![],
            dev_head_t: Some(head),
            maxshield: false,
            stage: StageTag::Raw,
            spatial_mode: None,
            highpass: None,
            lowpass: None,
            history: vec![],
        },
        data,
    }
}
