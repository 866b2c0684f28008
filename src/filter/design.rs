//! FIR filter design matching MNE / `scipy.signal.firwin`.
//!
//! For a filter with edges `l_freq` / `h_freq` Hz at sampling rate `sfreq`:
//!   • low transition bandwidth  = min(max(0.25 * l_freq, 2.0), l_freq)
//!   • high transition bandwidth = min(max(0.25 * h_freq, 2.0), sfreq / 2 - h_freq)
//!   • filter length N           = ceil(3.3 / min(trans_bw) * sfreq), rounded to odd
//!   • windowed-sinc design (Hamming window), cutoffs at the transition midpoints
use std::f64::consts::PI;

use anyhow::{bail, Result};

/// Compute MNE-compatible transition bandwidth below a high-pass edge.
///
/// Rule: `min(max(0.25 * l_freq, 2.0), l_freq)`
pub fn auto_trans_bandwidth(l_freq: f32) -> f32 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Compute MNE-compatible transition bandwidth above a low-pass edge.
///
/// Rule: `min(max(0.25 * h_freq, 2.0), sfreq / 2 - h_freq)`
pub fn auto_h_trans_bandwidth(h_freq: f32, sfreq: f32) -> f32 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Compute the number of FIR taps for a given transition bandwidth.
/// Returns an odd integer (required for zero-phase linear-phase FIR).
///
/// Formula: `ceil(3.3 / trans_bw * sfreq)` rounded up to odd.
pub fn auto_filter_length(trans_bw: f32, sfreq: f32) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Resolved edges of a filter, after automatic bandwidths have been filled in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterEdges {
    /// `(l_freq, l_trans_bandwidth)` of the high-pass edge.
    pub low: Option<(f32, f32)>,
    /// `(h_freq, h_trans_bandwidth)` of the low-pass edge.
    pub high: Option<(f32, f32)>,
}

impl FilterEdges {
    /// Fill in automatic transition bandwidths and check the edges against
    /// the Nyquist frequency.
    pub fn resolve(
        l_freq: Option<f32>,
        h_freq: Option<f32>,
        l_trans_bandwidth: Option<f32>,
        h_trans_bandwidth: Option<f32>,
        sfreq: f32,
    ) -> Result<Self> {
        let nyq = sfreq / 2.0;
        let low = match l_freq {
            Some(l) => {
                if !(l > 0.0 && l < nyq) {
                    bail!("l_freq {l} Hz must lie in (0, {nyq}) Hz");
                }
                let tb = l_trans_bandwidth.unwrap_or_else(|| auto_trans_bandwidth(l));
                if !(tb > 0.0) || l - tb < 0.0 {
                    bail!("l_trans_bandwidth {tb} Hz puts the stop band below 0 Hz");
                }
                Some((l, tb))
            }
            None => None,
        };
        let high = match h_freq {
            Some(h) => {
                if !(h > 0.0 && h < nyq) {
                    bail!("h_freq {h} Hz must lie in (0, {nyq}) Hz");
                }
                let tb = h_trans_bandwidth.unwrap_or_else(|| auto_h_trans_bandwidth(h, sfreq));
                if !(tb > 0.0) || h + tb > nyq {
                    bail!("h_trans_bandwidth {tb} Hz puts the stop band above Nyquist ({nyq} Hz)");
                }
                Some((h, tb))
            }
            None => None,
        };
        if let (Some((l, _)), Some((h, _))) = (low, high) {
            if l >= h {
                bail!("l_freq {l} Hz must be below h_freq {h} Hz");
            }
        }
        Ok(Self { low, high })
    }

    /// Odd filter length set by the narrowest transition band.
    pub fn filter_length(&self, sfreq: f32) -> Option<usize> {
        let tb = match (self.low, self.high) {
            (Some((_, a)), Some((_, b))) => a.min(b),
            (Some((_, a)), None) | (None, Some((_, a))) => a,
            (None, None) => return None,
        };
        Some(auto_filter_length(tb, sfreq))
    }
}

/// Design a zero-phase FIR for the given edges.
///
/// Band-pass when both edges are set, high-pass or low-pass when only one
/// is. Returns `None` when neither edge is set (nothing to filter).
pub fn design_filter(edges: &FilterEdges, sfreq: f32) -> Option<Vec<f32>> {
    let n = edges.filter_length(sfreq)?;
    let h = match (edges.low, edges.high) {
        (Some((l, ltb)), Some((h, htb))) => firwin_band(n, l - ltb / 2.0, h + htb / 2.0, sfreq),
        (Some((l, ltb)), None) => firwin(n, l - ltb / 2.0, sfreq, false),
        (None, Some((h, htb))) => firwin(n, h + htb / 2.0, sfreq, true),
        (None, None) => return None,
    };
    Some(h.iter().map(|&v| v as f32).collect())
}

/// Design a zero-phase highpass FIR filter using a Hamming-windowed sinc.
///
/// Matches `mne.filter.create_filter(None, sfreq, l_freq=l_freq, h_freq=None,
///   filter_length='auto', fir_window='hamming', fir_design='firwin', phase='zero')`.
pub fn design_highpass(l_freq: f32, sfreq: f32) -> Vec<f32> {
    let trans_bw = auto_trans_bandwidth(l_freq);
    let n = auto_filter_length(trans_bw, sfreq);
    let cutoff_hz = l_freq - trans_bw / 2.0;
    firwin(n, cutoff_hz, sfreq, false)
        .iter()
        .map(|&v| v as f32)
        .collect()
}

/// Design a lowpass (`pass_zero`) or highpass FIR filter using a
/// Hamming-windowed sinc. `cutoff_hz` is the -6 dB point.
pub fn firwin(n: usize, cutoff_hz: f32, sfreq: f32, pass_zero: bool) -> Vec<f64> {
    assert!(n % 2 == 1, "firwin requires odd N for linear-phase filter");
    let fc = cutoff_hz as f64 / (sfreq as f64 / 2.0);
    let win = hamming(n);

    let mut h = windowed_sinc(n, fc, &win);

    // Normalise so sum = 1 (unit DC gain for lowpass).
    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        // Highpass by spectral inversion.
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }
    h
}

/// Band-pass FIR between `low_hz` and `high_hz` (-6 dB points).
///
/// As in `scipy.signal.firwin(pass_zero=False)`, the taps are scaled for
/// unit gain at the centre of the pass band.
pub fn firwin_band(n: usize, low_hz: f32, high_hz: f32, sfreq: f32) -> Vec<f64> {
    assert!(n % 2 == 1, "firwin requires odd N for linear-phase filter");
    let nyq = sfreq as f64 / 2.0;
    let (f_lo, f_hi) = (low_hz as f64 / nyq, high_hz as f64 / nyq);
    let win = hamming(n);

    let hi = windowed_sinc(n, f_hi, &win);
    let lo = windowed_sinc(n, f_lo, &win);
    let mut h: Vec<f64> = hi.iter().zip(&lo).map(|(a, b)| a - b).collect();

    let alpha = (n - 1) as f64 / 2.0;
    let f_centre = (f_lo + f_hi) / 2.0;
    let gain: f64 = h
        .iter()
        .enumerate()
        .map(|(i, &v)| v * (PI * f_centre * (i as f64 - alpha)).cos())
        .sum();
    h.iter_mut().for_each(|v| *v /= gain);
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// `fc · sinc(fc · x)` windowed, for normalised cutoff `fc` in `[0, 1]`.
fn windowed_sinc(n: usize, fc: f64, win: &[f64]) -> Vec<f64> {
    let alpha = (n - 1) as f64 / 2.0;
    (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            // f(x) = sin(π·fc·x) / (π·x);  lim_{x→0} f(x) = fc  (L'Hôpital)
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect()
}
