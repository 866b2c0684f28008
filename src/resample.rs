//! FFT-based resampler matching MNE's `resample(..., npad='auto', method='fft')`.
//!
//! Algorithm (from `mne/cuda.py _fft_resample`):
//!   1. Pad with reflect-limited samples up to the next power of two.
//!   2. rfft(padded)  →  complex half-spectrum.
//!   3. If downsampling: double the Nyquist bin (use_len = new_len).
//!      If upsampling:   halve  the Nyquist bin (use_len = old_len).
//!   4. Scale all bins by `new_len_padded / old_len_padded`.
//!   5. irfft(spectrum, n=new_len_padded).
//!   6. Strip the resampled padding edges.
//!
//! The caller filters before resampling; this module does no anti-alias
//! filtering of its own beyond the spectral truncation in step 5.
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Compute the auto npad as MNE does: pad to the next power of 2.
///
/// ```text
/// min_add = min(n // 8, 100) * 2
/// total   = 2^ceil(log2(n + min_add)) - n
/// npads   = [total // 2, total - total // 2]
/// ```
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let sum = n + min_add;
    let next_pow2 = 1usize << ((sum as f64).log2().ceil() as u32);
    let total = next_pow2 - n;
    (total / 2, total - total / 2)
}

/// Number of samples after resampling `n` samples by `ratio`.
pub fn resampled_len(n: usize, ratio: f64) -> usize {
    (ratio * n as f64).round() as usize
}

/// Resampling plan for signals of one length and one rate ratio.
pub struct Resampler {
    ratio: f64,
    n_in: usize,
    npad: (usize, usize),
    old_len: usize,
    new_len_padded: usize,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
}

impl Resampler {
    pub fn new(n_in: usize, src_sfreq: f32, dst_sfreq: f32) -> Result<Self> {
        if !(src_sfreq > 0.0 && dst_sfreq > 0.0) {
            bail!("sampling rates must be positive (src={src_sfreq}, dst={dst_sfreq})");
        }
        if n_in == 0 {
            bail!("cannot resample an empty signal");
        }
        let ratio = dst_sfreq as f64 / src_sfreq as f64;
        let (npad_l, npad_r) = auto_npad(n_in);
        // Reflection cannot reach past the signal; MNE zero-pads the rest,
        // we clamp.
        let npad = (npad_l.min(n_in - 1), npad_r.min(n_in - 1));
        let old_len = n_in + npad.0 + npad.1;
        let new_len_padded = resampled_len(old_len, ratio);
        if new_len_padded == 0 {
            bail!("resampling {n_in} samples by {ratio} leaves nothing");
        }

        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let fwd = planner.plan_fft_forward(old_len);
        let inv = planner.plan_fft_inverse(new_len_padded);
        Ok(Self { ratio, n_in, npad, old_len, new_len_padded, fwd, inv })
    }

    pub fn output_len(&self) -> usize {
        resampled_len(self.n_in, self.ratio)
    }

    /// Resample one signal of the planned length.
    pub fn process(&self, x: &[f32]) -> Result<Vec<f32>> {
        let n_in = self.n_in;
        if x.len() != n_in {
            bail!("signal has {} samples, resampler planned for {n_in}", x.len());
        }
        let (pad_l, pad_r) = self.npad;
        let (old_len, new_len) = (self.old_len, self.new_len_padded);
        let final_len = self.output_len();

        // --- 1. Reflect-limited padding (matches MNE's _smart_pad) -------
        let mut buf: Vec<Complex<f64>> = Vec::with_capacity(old_len);
        let re = |v: f32| Complex { re: v as f64, im: 0.0 };
        for i in (1..=pad_l).rev() {
            buf.push(re(2.0 * x[0] - x[i]));
        }
        buf.extend(x.iter().map(|&v| re(v)));
        let last = x[n_in - 1];
        for i in 1..=pad_r {
            buf.push(re(2.0 * last - x[n_in - 1 - i]));
        }

        // --- 2. rfft, simulated with a full FFT ---------------------------
        self.fwd.process(&mut buf);
        let mut x_fft: Vec<Complex<f64>> = buf[..old_len / 2 + 1].to_vec();

        // --- 3. Nyquist bin ------------------------------------------------
        let shorter = new_len < old_len;
        let use_len = if shorter { new_len } else { old_len };
        if use_len % 2 == 0 {
            let nyq = use_len / 2;
            if nyq < x_fft.len() {
                x_fft[nyq] *= if shorter { 2.0 } else { 0.5 };
            }
        }

        // --- 4. Scale (MNE's boxcar window W = scale * ones) ---------------
        let scale = new_len as f64 / old_len as f64;
        for v in &mut x_fft {
            *v *= scale;
        }

        // --- 5. irfft(x_fft, n=new_len): truncate or zero-pad the half
        //        spectrum, then restore Hermitian symmetry. ----------------
        let new_rfft_len = new_len / 2 + 1;
        let mut spec = vec![Complex::<f64>::default(); new_len];
        let n_copy = x_fft.len().min(new_rfft_len);
        spec[..n_copy].copy_from_slice(&x_fft[..n_copy]);
        for i in 1..new_rfft_len {
            let idx = new_len - i;
            if idx >= new_rfft_len {
                spec[idx] = spec[i].conj();
            }
        }
        self.inv.process(&mut spec);
        let inv_scale = 1.0 / new_len as f64;

        // --- 6. Strip padding ---------------------------------------------
        let to_remove_l = resampled_len(pad_l, self.ratio).min(new_len);
        let strip_end = (to_remove_l + final_len).min(new_len);
        let mut out: Vec<f32> = spec[to_remove_l..strip_end]
            .iter()
            .map(|c| (c.re * inv_scale) as f32)
            .collect();
        out.resize(final_len, 0.0);
        Ok(out)
    }
}

/// Resample `data` ([C, T]) from `src_sfreq` to `dst_sfreq`.
pub fn resample(data: &Array2<f32>, src_sfreq: f32, dst_sfreq: f32) -> Result<Array2<f32>> {
    if (src_sfreq - dst_sfreq).abs() < 1e-6 {
        return Ok(data.clone());
    }
    let plan = Resampler::new(data.ncols(), src_sfreq, dst_sfreq)?;
    let mut out = Array2::<f32>::zeros((data.nrows(), plan.output_len()));
    for (ch, row) in data.rows().into_iter().enumerate() {
        let resampled = plan.process(&row.to_vec())?;
        out.row_mut(ch).assign(&ArrayView1::from(&resampled));
    }
    Ok(out)
}

/// Resample a single 1-D signal.
pub fn resample_1d(x: &[f32], src_sfreq: f32, dst_sfreq: f32) -> Result<Vec<f32>> {
    Resampler::new(x.len(), src_sfreq, dst_sfreq)?.process(x)
}
