//! Recording artifacts on disk.
//!
//! Every stage reads and writes recordings as safetensors files:
//!
//! ```text
//! u64 LE header length │ JSON header │ F32 sample bytes
//! ```
//!
//! The samples live in the `data` tensor (`[n_channels, n_times]`); the
//! measurement info (channels, bads, head position, lineage) is serialized
//! to JSON and stored under [`INFO_KEY`] in `__metadata__`. Reading the info
//! alone only touches the header, which is how the reference run's head
//! position is obtained without loading its samples.
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lineage::{SpatialMode, StageTag};

/// Key of the serialized [`RecordingInfo`] in the `__metadata__` map.
pub const INFO_KEY: &str = "megprep.info";
const DATA_KEY: &str = "data";
const METADATA_KEY: &str = "__metadata__";

/// Legacy Elekta/Neuromag magnetometer coil types and their replacement.
pub const COIL_VV_MAG_T1: i32 = 3022;
pub const COIL_VV_MAG_T2: i32 = 3023;
pub const COIL_VV_MAG_T3: i32 = 3024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Mag,
    Grad,
    Eeg,
    Eog,
    Ecg,
    Emg,
    Stim,
    Misc,
}

impl ChannelKind {
    pub fn is_meg(self) -> bool {
        matches!(self, ChannelKind::Mag | ChannelKind::Grad)
    }

    /// Channels that carry brain signal and are filtered by default.
    pub fn is_data(self) -> bool {
        self.is_meg() || self == ChannelKind::Eeg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    pub coil_type: i32,
    /// Position + orientation: `[x, y, z, ex…, ey…, ez…]` in metres.
    pub loc: [f32; 12],
}

/// Rigid device-to-head transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadTransform {
    pub rotation: [[f64; 3]; 3],
    /// Translation in metres.
    pub translation: [f64; 3],
}

impl HeadTransform {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }
}

/// Measurement info carried alongside the samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub sfreq: f32,
    pub channels: Vec<ChannelInfo>,
    /// Bad channel labels, kept sorted.
    pub bads: Vec<String>,
    /// Head position; absent for recordings without head digitization.
    pub dev_head_t: Option<HeadTransform>,
    /// Acquired with internal active shielding.
    #[serde(default)]
    pub maxshield: bool,
    /// Stage that wrote this artifact.
    pub stage: StageTag,
    /// Spatial mode of the lineage; `None` for `raw`.
    #[serde(default)]
    pub spatial_mode: Option<SpatialMode>,
    #[serde(default)]
    pub highpass: Option<f32>,
    #[serde(default)]
    pub lowpass: Option<f32>,
    /// Processing steps applied so far. Deliberately timestamp-free so
    /// re-running a stage yields identical bytes.
    #[serde(default)]
    pub history: Vec<String>,
}

impl RecordingInfo {
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn set_bads(&mut self, bads: &BTreeSet<String>) {
        self.bads = bads.iter().cloned().collect();
    }

    pub fn is_bad(&self, name: &str) -> bool {
        self.bads.iter().any(|b| b == name)
    }

    /// Indices of channels satisfying `pred` that are not marked bad.
    pub fn good_picks(&self, pred: impl Fn(ChannelKind) -> bool) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| pred(c.kind) && !self.is_bad(&c.name))
            .map(|(i, _)| i)
            .collect()
    }
}

/// A recording held fully in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub info: RecordingInfo,
    /// `[n_channels, n_times]` in SI units.
    pub data: Array2<f32>,
}

impl Recording {
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    /// Read header and samples.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (header, data_start) = parse_header(path, &bytes)?;
        let info = info_from_header(path, &header)?;

        let entry = header
            .get(DATA_KEY)
            .ok_or_else(|| Error::format(path, "missing 'data' tensor"))?;
        let dtype = entry["dtype"].as_str().unwrap_or_default();
        if dtype != "F32" {
            return Err(Error::format(path, format!("'data' has dtype {dtype}, expected F32")));
        }
        let shape = shape_of(path, entry)?;
        if shape.len() != 2 || shape[0] != info.channels.len() {
            return Err(Error::format(
                path,
                format!("'data' shape {shape:?} does not match {} channels", info.channels.len()),
            ));
        }
        let samples = read_f32_tensor(path, &bytes, data_start, entry)?;
        let data = Array2::from_shape_vec((shape[0], shape[1]), samples)
            .map_err(|e| Error::format(path, e.to_string()))?;
        Ok(Recording { info, data })
    }

    /// Atomically write the recording to `path`, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let info_json = serde_json::to_string(&self.info)?;
        let n_bytes = self.data.len() * 4;

        let mut metadata = serde_json::Map::new();
        metadata.insert(INFO_KEY.to_string(), serde_json::Value::String(info_json));
        let mut header = serde_json::Map::new();
        header.insert(METADATA_KEY.to_string(), serde_json::Value::Object(metadata));
        header.insert(
            DATA_KEY.to_string(),
            serde_json::json!({
                "dtype": "F32",
                "shape": [self.data.nrows(), self.data.ncols()],
                "data_offsets": [0, n_bytes],
            }),
        );
        let hdr_bytes = serde_json::to_vec(&header)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;

        let mut buf = Vec::with_capacity(8 + hdr_bytes.len() + pad + n_bytes);
        buf.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        buf.extend_from_slice(&hdr_bytes);
        buf.extend(std::iter::repeat(b' ').take(pad));
        // Logical (row-major) order, whatever the in-memory layout.
        for v in self.data.iter() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        write_atomic(path, &buf)
    }
}

/// Read only the measurement info of a recording; samples are not touched.
pub fn read_info(path: &Path) -> Result<RecordingInfo> {
    let mut file = File::open(path)?;
    let mut len = [0u8; 8];
    file.read_exact(&mut len)
        .map_err(|_| Error::format(path, "file too small for a safetensors header"))?;
    let n = u64::from_le_bytes(len) as usize;
    let file_len = file.metadata()?.len() as usize;
    if n > file_len.saturating_sub(8) {
        return Err(Error::format(path, format!("header length {n} exceeds file size")));
    }
    let mut hdr = vec![0u8; n];
    file.read_exact(&mut hdr)?;
    let header: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&hdr)
        .map_err(|e| Error::format(path, format!("invalid header: {e}")))?;
    info_from_header(path, &header)
}

/// Write `bytes` to a hidden sibling file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::format(path, "not a file path"))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!(".{file_name}.part"));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── Low-level safetensors parsing ───────────────────────────────────────────

type Header = serde_json::Map<String, serde_json::Value>;

fn parse_header(path: &Path, bytes: &[u8]) -> Result<(Header, usize)> {
    if bytes.len() < 8 {
        return Err(Error::format(path, "file too small for a safetensors header"));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[..8]);
    let n = u64::from_le_bytes(len) as usize;
    let end = 8usize
        .checked_add(n)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| Error::format(path, format!("header length {n} exceeds file size")))?;
    let header: Header = serde_json::from_slice(&bytes[8..end])
        .map_err(|e| Error::format(path, format!("invalid header: {e}")))?;
    Ok((header, end))
}

fn info_from_header(path: &Path, header: &Header) -> Result<RecordingInfo> {
    let raw = header
        .get(METADATA_KEY)
        .and_then(|m| m.get(INFO_KEY))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::format(path, format!("missing '{INFO_KEY}' metadata")))?;
    serde_json::from_str(raw).map_err(|e| Error::format(path, format!("invalid info: {e}")))
}

fn shape_of(path: &Path, entry: &serde_json::Value) -> Result<Vec<usize>> {
    entry["shape"]
        .as_array()
        .ok_or_else(|| Error::format(path, "tensor without shape"))?
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|d| d as usize)
                .ok_or_else(|| Error::format(path, "non-integer tensor dimension"))
        })
        .collect()
}

fn read_f32_tensor(
    path: &Path,
    bytes: &[u8],
    data_start: usize,
    entry: &serde_json::Value,
) -> Result<Vec<f32>> {
    let offsets = entry["data_offsets"]
        .as_array()
        .filter(|o| o.len() == 2)
        .ok_or_else(|| Error::format(path, "tensor without data_offsets"))?;
    let s = offsets[0].as_u64().unwrap_or(u64::MAX) as usize;
    let e = offsets[1].as_u64().unwrap_or(u64::MAX) as usize;
    let raw = data_start
        .checked_add(e)
        .filter(|&end| s <= e && end <= bytes.len())
        .map(|end| &bytes[data_start + s..end])
        .ok_or_else(|| Error::format(path, "tensor offsets out of bounds"))?;
    Ok(raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Recording {
        let channels = ["MEG0111", "MEG0112", "EEG001"]
            .iter()
            .zip([ChannelKind::Mag, ChannelKind::Grad, ChannelKind::Eeg])
            .map(|(n, kind)| ChannelInfo {
                name: n.to_string(),
                kind,
                coil_type: 0,
                loc: [0.0; 12],
            })
            .collect();
        Recording {
            info: RecordingInfo {
                sfreq: 100.0,
                channels,
                bads: vec!["EEG001".into()],
                dev_head_t: Some(HeadTransform::identity()),
                maxshield: false,
                stage: StageTag::Raw,
                spatial_mode: None,
                highpass: None,
                lowpass: None,
                history: vec![],
            },
            data: Array2::from_shape_fn((3, 50), |(c, t)| (c * 100 + t) as f32),
        }
    }

    #[test]
    fn save_then_load_preserves_samples_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_raw.safetensors");
        let rec = tiny();
        rec.save(&path).unwrap();
        assert_eq!(Recording::load(&path).unwrap(), rec);
    }

    #[test]
    fn read_info_skips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_raw.safetensors");
        tiny().save(&path).unwrap();
        // Truncate the sample block: the header must still be readable.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 40]).unwrap();
        let info = read_info(&path).unwrap();
        assert_eq!(info.dev_head_t, Some(HeadTransform::identity()));
        assert!(Recording::load(&path).is_err());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_raw.safetensors");
        tiny().save(&path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("x_raw.safetensors")]);
    }

    #[test]
    fn garbage_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        std::fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\x7fjunk").unwrap();
        assert!(matches!(read_info(&path), Err(Error::Format { .. })));
        assert!(matches!(Recording::load(&path), Err(Error::Format { .. })));
    }
}
