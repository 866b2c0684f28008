use megprep::filter::{
    apply_fir_zero_phase, auto_filter_length, design_filter, design_highpass, FilterEdges,
};
use ndarray::Array2;
use std::f32::consts::PI;

fn sines(sfreq: f32, secs: usize, comps: &[(f32, f32)]) -> Vec<f32> {
    (0..secs * sfreq as usize)
        .map(|i| {
            let t = i as f32 / sfreq;
            comps.iter().map(|&(f, a)| a * (2.0 * PI * f * t).sin()).sum()
        })
        .collect()
}

fn interior_rms(x: &[f32], guard: usize) -> f32 {
    let interior = &x[guard..x.len() - guard];
    (interior.iter().map(|v| v * v).sum::<f32>() / interior.len() as f32).sqrt()
}

// ── Coefficient tests ─────────────────────────────────────────────────────────

#[test]
fn highpass_coeffs_sum_near_zero() {
    let h = design_highpass(0.5, 256.0);
    let s: f32 = h.iter().sum();
    assert!(s.abs() < 1e-5, "sum(h) = {s:.2e}, expected ≈ 0 for highpass");
}

#[test]
fn band_pass_coeffs_symmetric_and_odd() {
    let edges = FilterEdges::resolve(Some(1.0), Some(40.0), None, None, 1000.0).unwrap();
    let h = design_filter(&edges, 1000.0).unwrap();
    let n = h.len();
    assert_eq!(n % 2, 1);
    assert_eq!(n, auto_filter_length(1.0, 1000.0));
    for i in 0..n / 2 {
        let diff = (h[i] - h[n - 1 - i]).abs();
        assert!(diff < 1e-7, "h[{i}]={} ≠ h[{}]={}", h[i], n - 1 - i, h[n - 1 - i]);
    }
}

#[test]
fn edges_outside_nyquist_are_rejected() {
    assert!(FilterEdges::resolve(Some(1.0), Some(150.0), None, None, 250.0).is_err());
    assert!(FilterEdges::resolve(Some(0.5), None, Some(1.0), None, 250.0).is_err());
    assert!(FilterEdges::resolve(None, None, None, None, 250.0)
        .map(|e| design_filter(&e, 250.0).is_none())
        .unwrap());
}

// ── Application tests ─────────────────────────────────────────────────────────

#[test]
fn highpass_removes_sub_hz_content() {
    let sfreq = 256.0_f32;
    let row = sines(sfreq, 60, &[(0.1, 1.0), (5.0, 1.0)]);
    let n = row.len();
    let mut data = Array2::from_shape_vec((1, n), row).unwrap();
    let h = design_highpass(0.5, sfreq);
    apply_fir_zero_phase(&mut data, &h, &[0]).unwrap();

    // Pure 5 Hz sine has RMS = 1/sqrt(2) ≈ 0.707; 0.1 Hz mostly removed.
    let rms = interior_rms(data.row(0).as_slice().unwrap(), h.len());
    assert!(rms > 0.5, "RMS too low ({rms:.3}), pass-band signal attenuated?");
    assert!(rms < 0.85, "RMS too high ({rms:.3}), stop-band not attenuated?");
}

#[test]
fn band_pass_keeps_alpha_and_drops_line_noise() {
    let sfreq = 500.0_f32;
    let row = sines(sfreq, 20, &[(10.0, 1.0), (60.0, 1.0)]);
    let n = row.len();
    let mut data = Array2::from_shape_vec((2, n / 2), row).unwrap();
    let edges = FilterEdges::resolve(Some(1.0), Some(40.0), None, None, sfreq).unwrap();
    let h = design_filter(&edges, sfreq).unwrap();
    apply_fir_zero_phase(&mut data, &h, &[0, 1]).unwrap();

    for ch in 0..2 {
        let rms = interior_rms(data.row(ch).as_slice().unwrap(), h.len() / 2);
        approx::assert_abs_diff_eq!(rms, 1.0 / 2f32.sqrt(), epsilon = 0.02);
    }
}

#[test]
fn zero_phase_keeps_peaks_in_place() {
    let sfreq = 250.0_f32;
    let row = sines(sfreq, 30, &[(8.0, 1.0)]);
    let n = row.len();
    let mut data = Array2::from_shape_vec((1, n), row.clone()).unwrap();
    let edges = FilterEdges::resolve(Some(1.0), Some(30.0), None, None, sfreq).unwrap();
    let h = design_filter(&edges, sfreq).unwrap();
    apply_fir_zero_phase(&mut data, &h, &[0]).unwrap();

    let mid = n / 2;
    for t in mid..mid + 100 {
        approx::assert_abs_diff_eq!(data[[0, t]], row[t], epsilon = 0.02);
    }
}
