//! Tests of the electrode-compensation pipeline on synthetic recordings
//! with known ground truth.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dynclamp_backend::*;

fn temp(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dynclamp_aec_{}_{}", std::process::id(), name))
}

/// Truncated convolution matching the causal zero-history convention of
/// the compensation: `out[n] = sum_k kernel[k] * input[n - k]`.
fn convolve(kernel: &[f64], input: &[f64]) -> Vec<f64> {
    let mut out = vec![0.; input.len()];
    for n in 0..input.len() {
        let taps = kernel.len().min(n + 1);
        for k in 0..taps {
            out[n] += kernel[k] * input[n - k];
        }
    }
    out
}

/// Fast double-exponential electrode response, `scale` ohms.
fn electrode_shape(len: usize, scale: f64) -> Vec<f64> {
    (0..len)
        .map(|j| {
            let t = j as f64;
            scale * ((-t / 4.).exp() - (-t / 1.2).exp())
        })
        .collect()
}

fn rms(values: &[f64]) -> f64 {
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

#[test]
fn white_noise_recording_recovers_the_kernel() {
    let mut rng = StdRng::seed_from_u64(1);
    let n = 100_000;
    let k_len = 200;
    let v_rest = -0.065;

    let kernel_true = electrode_shape(k_len, 1e6);
    let current: Vec<f64> = (0..n).map(|_| rng.gen_range(-2e-10..2e-10)).collect();
    let voltage: Vec<f64> = convolve(&kernel_true, &current)
        .iter()
        .map(|v| v + v_rest)
        .collect();

    let raw = full_kernel(&voltage, &current, k_len).unwrap();
    assert_eq!(raw.kernel.len(), k_len);

    let error: Vec<f64> = raw
        .kernel
        .iter()
        .zip(kernel_true.iter())
        .map(|(estimated, truth)| estimated - truth)
        .collect();
    let relative = rms(&error) / rms(&kernel_true);
    assert!(relative < 0.02, "relative rms error {}", relative);
    assert!(
        (raw.v0 - v_rest).abs() < 1e-4,
        "resting potential estimate {}",
        raw.v0
    );
}

#[test]
fn recording_too_short_for_the_kernel_is_rejected() {
    let v = vec![0.; 300];
    let i = vec![1e-10; 300];
    let err = full_kernel(&v, &i, 200).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn split_separates_electrode_from_membrane() {
    let mut rng = StdRng::seed_from_u64(7);
    let k_len = 300;
    let tail_start = 50;
    let tau_m = 100.;

    let mut ke_true = electrode_shape(tail_start, 2.5e6);
    ke_true.resize(k_len, 0.);
    let km_true: Vec<f64> = (0..k_len)
        .map(|j| 1e4 * (-(j as f64) / tau_m).exp())
        .collect();
    let mut kernel: Vec<f64> = ke_true
        .iter()
        .zip(km_true.iter())
        .map(|(e, m)| e + m)
        .collect();
    // Estimation noise lives in the head of a measured kernel; the tail
    // is denoised by the exponential fit before the removal search.
    for value in kernel.iter_mut().take(tail_start) {
        *value += rng.gen_range(-3e3..3e3);
    }

    let raw = FullKernel {
        kernel: kernel.into(),
        v0: -0.065,
    };
    let split = electrode_kernel(&raw, tail_start).unwrap();

    assert_eq!(split.ke.len(), tail_start);
    assert_eq!(split.km.len(), k_len);
    assert!((split.tau - tau_m).abs() < 0.5, "tau {}", split.tau);

    let ke_error: Vec<f64> = split
        .ke
        .iter()
        .zip(ke_true.iter())
        .map(|(estimated, truth)| estimated - truth)
        .collect();
    let ke_relative = rms(&ke_error) / rms(&ke_true[..tail_start]);
    assert!(ke_relative < 0.25, "electrode rms error {}", ke_relative);

    let km_tail_error: Vec<f64> = split.km.as_slice().unwrap()[tail_start..]
        .iter()
        .zip(km_true[tail_start..].iter())
        .map(|(estimated, truth)| estimated - truth)
        .collect();
    let km_relative = rms(&km_tail_error) / rms(&km_true[tail_start..]);
    assert!(km_relative < 0.05, "membrane tail rms error {}", km_relative);

    assert!(
        split.ke_tail_ratio().abs() < 0.05,
        "electrode response should have decayed by the tail ({})",
        split.ke_tail_ratio()
    );
}

#[test]
fn split_rejects_a_tail_start_outside_the_kernel() {
    let raw = FullKernel {
        kernel: ndarray::Array1::from(vec![1., 0.5, 0.25]),
        v0: 0.,
    };
    assert!(matches!(
        electrode_kernel(&raw, 0).unwrap_err(),
        Error::Schema(_)
    ));
    assert!(matches!(
        electrode_kernel(&raw, 3).unwrap_err(),
        Error::Schema(_)
    ));
}

#[test]
fn compensation_subtracts_the_electrode_drop() {
    let mut rng = StdRng::seed_from_u64(3);
    let n = 3000;
    let v_rest = -0.065;

    let ke = electrode_shape(30, 1e6);
    let km: Vec<f64> = (0..300).map(|j| 3e5 * (-(j as f64) / 100.).exp()).collect();
    let current: Vec<f64> = (0..n).map(|_| rng.gen_range(-2e-10..2e-10)).collect();

    let membrane: Vec<f64> = convolve(&km, &current)
        .iter()
        .map(|v| v + v_rest)
        .collect();
    let electrode_drop = convolve(&ke, &current);
    let recorded: Vec<f64> = membrane
        .iter()
        .zip(electrode_drop.iter())
        .map(|(m, e)| m + e)
        .collect();

    let compensated = compensate(&recorded, &current, &ke).unwrap();
    for (got, want) in compensated.iter().zip(membrane.iter()) {
        assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
    }
}

#[test]
fn compensation_rejects_mismatched_lengths() {
    let ke = electrode_shape(10, 1e6);
    let v = vec![0.; 100];
    let i = vec![0.; 50];
    let err = compensate(&v, &i, &ke).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn compensation_is_linear() {
    let mut rng = StdRng::seed_from_u64(5);
    let n = 2000;
    let ke: Vec<f64> = (0..40).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let v1: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let v2: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let i1: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let i2: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let (a, b) = (2., 3.);
    let v: Vec<f64> = v1.iter().zip(v2.iter()).map(|(x, y)| a * x + b * y).collect();
    let i: Vec<f64> = i1.iter().zip(i2.iter()).map(|(x, y)| a * x + b * y).collect();

    let combined = compensate(&v, &i, &ke).unwrap();
    let first = compensate(&v1, &i1, &ke).unwrap();
    let second = compensate(&v2, &i2, &ke).unwrap();
    for n in 0..combined.len() {
        let superposed = a * first[n] + b * second[n];
        assert!((combined[n] - superposed).abs() < 1e-9);
    }
}

#[test]
fn kernel_files_round_trip_through_gohm() {
    let path = temp("kernel.dat");
    let ke = [1.5e6, -2.3e5, 0., 7.89e3, 12.5];
    save_kernel(&path, &ke).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let first = contents.lines().next().unwrap();
    // On-disk values carry the conventional 1e9 scaling.
    assert_eq!(first, "1.5000000000e15");

    let loaded = load_kernel(&path).unwrap();
    assert_eq!(loaded.len(), ke.len());
    for (got, want) in loaded.iter().zip(ke.iter()) {
        if *want == 0. {
            assert_eq!(*got, 0.);
        } else {
            assert!(((got - want) / want).abs() < 1e-9);
        }
    }
    std::fs::remove_file(&path).unwrap();
}
