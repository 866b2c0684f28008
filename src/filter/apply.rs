//! Overlap-add zero-phase FIR convolution.
//!
//! Matches MNE's `_overlap_add_filter` + `_1d_overlap_filter`.
//!
//! Zero-phase is achieved by shifting the output left by `(N-1)/2` samples,
//! NOT by running filtfilt. The edge transient is suppressed by
//! reflect-limited padding of `N-1` samples on each side.
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// An FIR kernel planned for signals of one length.
///
/// All channels of a recording share a length, so the block size, the FFT
/// plans and the kernel spectrum are computed once per recording.
pub struct OverlapAdd {
    n_h: usize,
    n_x: usize,
    n_fft: usize,
    h_fft: Vec<Complex<f32>>,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
}

impl OverlapAdd {
    /// Plan `h` (odd length) for signals of `n_x` samples.
    pub fn new(h: &[f32], n_x: usize) -> Result<Self> {
        let n_h = h.len();
        if n_h % 2 == 0 {
            bail!("zero-phase FIR needs an odd number of taps, got {n_h}");
        }
        let n_edge = n_h - 1;
        let n_fft = choose_fft_len(n_h, n_x + 2 * n_edge);

        let mut planner: FftPlanner<f32> = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n_fft);
        let inv = planner.plan_fft_inverse(n_fft);

        let mut h_fft: Vec<Complex<f32>> = h
            .iter()
            .map(|&v| Complex { re: v, im: 0.0 })
            .chain(std::iter::repeat(Complex::default()))
            .take(n_fft)
            .collect();
        fwd.process(&mut h_fft);

        Ok(Self { n_h, n_x, n_fft, h_fft, fwd, inv })
    }

    /// Filter one signal of the planned length.
    pub fn filter(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.n_x {
            bail!("signal has {} samples, kernel planned for {}", x.len(), self.n_x);
        }
        if x.is_empty() {
            return Ok(vec![]);
        }
        let (n_h, n_fft) = (self.n_h, self.n_fft);
        let shift = (n_h - 1) / 2;
        let n_edge = n_h - 1;

        let x_ext = reflect_limited_pad(x, n_edge, n_edge);
        let n_ext = x_ext.len();
        let n_seg = n_fft - n_h + 1;
        let inv_scale = 1.0 / n_fft as f32;
        let mut x_filtered = vec![0.0_f32; n_ext];
        let mut buf = vec![Complex::<f32>::default(); n_fft];

        for start in (0..n_ext).step_by(n_seg) {
            let stop = (start + n_seg).min(n_ext);

            buf.fill(Complex::default());
            for (b, &v) in buf.iter_mut().zip(&x_ext[start..stop]) {
                b.re = v;
            }
            self.fwd.process(&mut buf);
            for (b, &hf) in buf.iter_mut().zip(&self.h_fft) {
                *b *= hf;
            }
            self.inv.process(&mut buf);

            // Accumulate, folding in the zero-phase shift.
            let out_start = start.saturating_sub(shift);
            let out_end = (out_start + n_fft).min(n_ext);
            let prod_start = shift.saturating_sub(start);
            for (o, p) in (out_start..out_end).zip(prod_start..n_fft) {
                x_filtered[o] += buf[p].re * inv_scale;
            }
        }

        Ok(x_filtered[n_edge..n_edge + x.len()].to_vec())
    }
}

/// Apply a zero-phase FIR filter in-place to the rows of `data` ([C, T])
/// listed in `picks`. Other rows are left untouched.
pub fn apply_fir_zero_phase(data: &mut Array2<f32>, h: &[f32], picks: &[usize]) -> Result<()> {
    let kernel = OverlapAdd::new(h, data.ncols())?;
    for &ch in picks {
        if ch >= data.nrows() {
            bail!("pick {ch} out of range for {} channels", data.nrows());
        }
        let row: Vec<f32> = data.row(ch).to_vec();
        let filtered = kernel.filter(&row)?;
        data.row_mut(ch).assign(&ArrayView1::from(&filtered));
    }
    Ok(())
}

/// Filter a single 1-D signal with the overlap-add algorithm.
pub fn filter_1d(x: &[f32], h: &[f32]) -> Result<Vec<f32>> {
    OverlapAdd::new(h, x.len())?.filter(x)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Reflect-limited padding (matches MNE's `_smart_pad`).
///
/// Left:  `pad[i] = 2*x[0] - x[n_l-i]`  for i in 1..=n_l
/// Right: `pad[i] = 2*x[-1] - x[-(i+1)]` for i in 1..=n_r
/// Padding beyond `len - 1` samples is zero-filled.
fn reflect_limited_pad(x: &[f32], n_l: usize, n_r: usize) -> Vec<f32> {
    let n = x.len();
    let actual_l = n_l.min(n - 1);
    let actual_r = n_r.min(n - 1);

    let mut out = Vec::with_capacity(n_l + n + n_r);
    out.resize(n_l - actual_l, 0.0);
    for i in (1..=actual_l).rev() {
        out.push(2.0 * x[0] - x[i]);
    }
    out.extend_from_slice(x);
    let last = x[n - 1];
    for i in 1..=actual_r {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out.resize(n_l + n + n_r, 0.0);
    out
}

/// Choose the optimal FFT block size (power of 2 minimising operation count).
///
/// Matches MNE's cost function:
///   `cost = ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let max_pow = (n_x as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow.max(min_pow);
    let mut best_cost = f64::INFINITY;
    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::design::design_highpass;

    #[test]
    fn filter_preserves_length() {
        let x: Vec<f32> = (0..1024).map(|i| (i as f32 / 1024.0).sin()).collect();
        let h = design_highpass(0.5, 256.0);
        let y = filter_1d(&x, &h).unwrap();
        assert_eq!(y.len(), x.len());
    }

    #[test]
    fn filter_removes_dc() {
        let x = vec![1.0_f32; 4096];
        let h = design_highpass(0.5, 256.0);
        let y = filter_1d(&x, &h).unwrap();
        let n_h = h.len();
        let interior = &y[n_h..y.len() - n_h];
        let max_val: f32 = interior.iter().map(|v| v.abs()).fold(0.0_f32, f32::max);
        assert!(max_val < 1e-3, "DC not removed: max={max_val}");
    }

    #[test]
    fn identity_kernel_is_identity() {
        let x: Vec<f32> = (0..300).map(|i| ((i * 7) % 13) as f32).collect();
        let y = filter_1d(&x, &[0.0, 1.0, 0.0]).unwrap();
        for (a, b) in x.iter().zip(&y) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-4_f32);
        }
    }

    #[test]
    fn only_picked_rows_change() {
        let mut data = Array2::from_elem((3, 2048), 1.0_f32);
        let h = design_highpass(0.5, 256.0);
        apply_fir_zero_phase(&mut data, &h, &[1]).unwrap();
        assert!(data.row(0).iter().all(|&v| v == 1.0));
        assert!(data.row(2).iter().all(|&v| v == 1.0));
        assert!(data.row(1).iter().any(|&v| (v - 1.0).abs() > 0.1));
    }

    #[test]
    fn even_kernel_rejected() {
        assert!(filter_1d(&[1.0; 16], &[0.5, 0.5]).is_err());
    }

    #[test]
    fn reflect_limited_left_pad() {
        let x = [1.0_f32, 2.0, 3.0, 4.0, 5.0];
        let padded = reflect_limited_pad(&x, 3, 0);
        // left pad: 2*1 - x[3]=4 → -2, 2*1 - x[2]=3 → -1, 2*1 - x[1]=2 → 0
        assert_eq!(&padded[..3], &[-2.0_f32, -1.0, 0.0]);
        assert_eq!(&padded[3..], &x[..]);
    }

    #[test]
    fn reflect_limited_pad_zero_fills_short_signals() {
        let x = [1.0_f32, 3.0];
        let padded = reflect_limited_pad(&x, 3, 3);
        assert_eq!(padded, vec![0.0, 0.0, -1.0, 1.0, 3.0, 5.0, 0.0, 0.0]);
    }
}
