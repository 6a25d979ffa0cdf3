//! Active Electrode Compensation: estimating the linear electrode kernel
//! from a paired voltage/current recording.
//!
//! The procedure has two stages. [`full_kernel`] estimates the raw
//! impulse response of electrode plus membrane by solving the symmetric
//! Toeplitz normal equations of the current autocorrelation against the
//! voltage/current cross-correlation, via Levinson-Durbin recursion
//! (O(K_len^2); a dense solve does not scale to the kernel sizes in
//! use). [`electrode_kernel`] then splits the raw kernel: the tail is
//! fit to a single decaying exponential (the membrane), an auxiliary
//! low-pass filter parameterized by `x` is matched to the tail by a
//! coarse geometric sweep plus golden-section refinement, and the
//! residual's head is the electrode kernel.
//!
//! Kernels are held in ohms (volts over amps) in memory; the file
//! boundary scales by 1e9 so the stored values read as GOhm.

use std::fs::File;
use std::io::{BufRead, BufReader, Write as _};
use std::path::Path;

use ndarray::Array1;
use tracing::debug;

use crate::error::{Error, Result};

/// Raw kernel estimate: electrode plus membrane, and the resting
/// voltage recovered alongside it.
#[derive(Clone, Debug)]
pub struct FullKernel {
    pub kernel: Array1<f64>,
    pub v0: f64,
}

/// Electrode/membrane split of a raw kernel.
#[derive(Clone, Debug)]
pub struct ElectrodeKernel {
    /// The fast electrode part, `tail_start` taps.
    pub ke: Array1<f64>,
    /// The fitted membrane response over the full raw-kernel length,
    /// kept for diagnostics.
    pub km: Array1<f64>,
    /// Membrane time constant, in sample units.
    pub tau: f64,
}

impl ElectrodeKernel {
    /// Ratio of the last electrode tap to the peak tap. A value far
    /// from zero means `tail_start` cut into the electrode response and
    /// should be re-picked.
    pub fn ke_tail_ratio(&self) -> f64 {
        let max = self.ke.iter().cloned().fold(f64::MIN, f64::max);
        self.ke[self.ke.len() - 1] / max
    }
}

/// Solves the symmetric Toeplitz system `T x = y` where
/// `T[i][j] = r[|i - j|]`, by Levinson-Durbin recursion.
fn toeplitz_solve(r: &[f64], y: &[f64]) -> Result<Vec<f64>> {
    let n = r.len();
    if r[0] == 0. {
        return Err(Error::Degenerate(
            "zero-lag autocorrelation is zero (constant or empty current?)".to_string(),
        ));
    }
    // Forward vector f solves T_k f = e1; by symmetry the backward
    // vector is f reversed.
    let mut f = vec![1. / r[0]];
    let mut b = vec![1. / r[0]];
    let mut x = vec![y[0] / r[0]];

    for k in 1..n {
        let e_f: f64 = (0..k).map(|j| r[k - j] * f[j]).sum();
        let e_b: f64 = (0..k).map(|j| r[j + 1] * b[j]).sum();
        let denom = 1. - e_f * e_b;
        if denom.abs() < 1e-300 {
            return Err(Error::Degenerate(format!(
                "Levinson-Durbin pivot vanished at order {} (reflection product {})",
                k, e_f * e_b
            )));
        }
        let mut f_new = vec![0.; k + 1];
        let mut b_new = vec![0.; k + 1];
        for j in 0..k {
            f_new[j] += f[j] / denom;
            b_new[j + 1] += b[j] / denom;
        }
        for j in 0..k {
            f_new[j + 1] -= e_f * b[j] / denom;
            b_new[j] -= e_b * f[j] / denom;
        }
        f = f_new;
        b = b_new;

        let e_x: f64 = (0..k).map(|j| r[k - j] * x[j]).sum();
        x.push(0.);
        let correction = y[k] - e_x;
        for j in 0..=k {
            x[j] += correction * b[j];
        }
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate(
            "Toeplitz solution is not finite (signals too short or current too constant)"
                .to_string(),
        ));
    }
    Ok(x)
}

/// Estimates the raw kernel (first `k_len` taps) and the resting
/// voltage from a paired recording of voltage `v` and injected current
/// `i`.
pub fn full_kernel(v: &[f64], i: &[f64], k_len: usize) -> Result<FullKernel> {
    if v.len() != i.len() {
        return Err(Error::Schema(format!(
            "voltage and current lengths differ ({} vs {})",
            v.len(),
            i.len()
        )));
    }
    let n = v.len();
    if k_len == 0 || n <= 2 * k_len {
        return Err(Error::Schema(format!(
            "recording of {} samples is too short for a {}-tap kernel",
            n, k_len
        )));
    }

    let v_mean = v.iter().sum::<f64>() / n as f64;
    let i_mean = i.iter().sum::<f64>() / n as f64;

    let mut cvi = vec![0.; k_len];
    let mut cii = vec![0.; k_len];
    for k in 0..k_len {
        let m = n - k;
        let mut sv = 0.;
        let mut si = 0.;
        for j in 0..m {
            sv += (v[k + j] - v_mean) * i[j];
            si += i[k + j] * i[j];
        }
        cvi[k] = sv / m as f64 - i_mean * i_mean;
        cii[k] = si / m as f64;
    }

    let kernel = toeplitz_solve(&cii, &cvi)?;
    let v0 = v_mean - i_mean * kernel.iter().sum::<f64>();
    debug!(k_len, v0, "estimated full kernel");
    Ok(FullKernel {
        kernel: Array1::from(kernel),
        v0,
    })
}

/// Fits `k[tail_start..]` to `a * exp(-t / tau)` with `t` counted in
/// samples from `tail_start`, by Levenberg-Marquardt on `(a, tau)`.
fn fit_tail(k: &[f64], tail_start: usize) -> Result<(f64, f64)> {
    let tail = &k[tail_start..];
    let m = tail.len();
    if m < 4 {
        return Err(Error::Schema(format!(
            "tail of {} samples is too short to fit",
            m
        )));
    }

    // Log-linear regression on the positive samples seeds the fit.
    let mut st = 0.;
    let mut sl = 0.;
    let mut stt = 0.;
    let mut stl = 0.;
    let mut count = 0.;
    for (t, value) in tail.iter().enumerate() {
        if *value > 0. {
            let l = value.ln();
            st += t as f64;
            sl += l;
            stt += (t * t) as f64;
            stl += t as f64 * l;
            count += 1.;
        }
    }
    if count < 2. {
        return Err(Error::Degenerate(
            "kernel tail has no positive samples to seed the exponential fit".to_string(),
        ));
    }
    let slope = (count * stl - st * sl) / (count * stt - st * st);
    let mut tau = if slope < 0. { -1. / slope } else { m as f64 / 2. };
    let mut a = ((sl - slope * st) / count).exp();

    let cost = |a: f64, tau: f64| -> f64 {
        tail.iter()
            .enumerate()
            .map(|(t, value)| {
                let r = value - a * (-(t as f64) / tau).exp();
                r * r
            })
            .sum()
    };

    let mut lambda = 1e-3;
    let mut current = cost(a, tau);
    for _ in 0..100 {
        // Normal equations of the 2-parameter Jacobian.
        let mut jtj = [[0.; 2]; 2];
        let mut jtr = [0.; 2];
        for (t, value) in tail.iter().enumerate() {
            let t = t as f64;
            let e = (-t / tau).exp();
            let model = a * e;
            let residual = value - model;
            let ja = e;
            let jtau = a * t / (tau * tau) * e;
            jtj[0][0] += ja * ja;
            jtj[0][1] += ja * jtau;
            jtj[1][1] += jtau * jtau;
            jtr[0] += ja * residual;
            jtr[1] += jtau * residual;
        }
        jtj[1][0] = jtj[0][1];

        let a00 = jtj[0][0] * (1. + lambda);
        let a11 = jtj[1][1] * (1. + lambda);
        let det = a00 * a11 - jtj[0][1] * jtj[1][0];
        if det.abs() < 1e-300 {
            return Err(Error::Degenerate(format!(
                "singular normal equations in tail fit (det {})",
                det
            )));
        }
        let da = (jtr[0] * a11 - jtj[0][1] * jtr[1]) / det;
        let dtau = (a00 * jtr[1] - jtj[1][0] * jtr[0]) / det;

        let (a_try, tau_try) = (a + da, tau + dtau);
        let tried = if tau_try > 0. {
            cost(a_try, tau_try)
        } else {
            f64::INFINITY
        };
        if tried < current {
            let improved = current - tried;
            a = a_try;
            tau = tau_try;
            current = tried;
            lambda = (lambda * 0.3).max(1e-12);
            if improved < 1e-12 * (1. + current) {
                break;
            }
        } else {
            lambda *= 10.;
            if lambda > 1e12 {
                break;
            }
        }
    }

    if !(tau > 0.) || !tau.is_finite() || !a.is_finite() {
        return Err(Error::Degenerate(format!(
            "tail exponential fit did not converge to a positive time constant (tau {})",
            tau
        )));
    }
    Ok((a, tau))
}

/// The auxiliary membrane filter of the removal search:
/// `Y[0] = (alpha/(alpha+1)) K[0]`,
/// `Y[i] = (alpha K[i] + lambda Y[i-1]) / (1 + alpha)` with
/// `alpha = x/tau`, `lambda = exp(-1/tau)`.
fn membrane_filter(k: &[f64], x: f64, tau: f64) -> Vec<f64> {
    let alpha = x / tau;
    let lambda = (-1. / tau).exp();
    let mut y = vec![0.; k.len()];
    y[0] = alpha / (alpha + 1.) * k[0];
    for i in 1..k.len() {
        y[i] = (alpha * k[i] + lambda * y[i - 1]) / (1. + alpha);
    }
    y
}

fn removal_error(k: &[f64], x: f64, tau: f64, tail_start: usize) -> f64 {
    let y = membrane_filter(k, x, tau);
    k.iter()
        .zip(y.iter())
        .skip(tail_start)
        .map(|(k, y)| (k - y) * (k - y))
        .sum()
}

/// Splits a raw kernel into its electrode and membrane parts.
///
/// `tail_start` is the first sample considered pure membrane; a typical
/// choice is about one millisecond of data into the raw kernel.
pub fn electrode_kernel(raw: &FullKernel, tail_start: usize) -> Result<ElectrodeKernel> {
    let k_len = raw.kernel.len();
    if tail_start == 0 || tail_start >= k_len {
        return Err(Error::Schema(format!(
            "tail_start {} outside the raw kernel of {} taps",
            tail_start, k_len
        )));
    }

    let mut k: Vec<f64> = raw.kernel.to_vec();
    let (a, tau) = fit_tail(&k, tail_start)?;
    debug!(a, tau, "fitted membrane tail");

    // Replace the tail by its fit to denoise before the removal search.
    for j in 0..k_len - tail_start {
        k[tail_start + j] = a * (-(j as f64) / tau).exp();
    }

    // Coarse geometric sweep for the first local minimum of the removal
    // error.
    let mut x = 0.1;
    let mut best = removal_error(&k, x, tau, tail_start);
    let mut bracketed = false;
    for _ in 0..70 {
        let x_next = x * 1.1;
        let err = removal_error(&k, x_next, tau, tail_start);
        if err > best {
            bracketed = true;
            break;
        }
        x = x_next;
        best = err;
    }
    if !bracketed {
        return Err(Error::Degenerate(format!(
            "membrane-removal search failed to bracket a minimum (error still falling at x {})",
            x
        )));
    }

    // Golden-section refinement around the coarse minimum.
    let phi = (5f64.sqrt() - 1.) / 2.;
    let (mut lo, mut hi) = (x / 2., x * 2.);
    let mut m1 = hi - phi * (hi - lo);
    let mut m2 = lo + phi * (hi - lo);
    let mut e1 = removal_error(&k, m1, tau, tail_start);
    let mut e2 = removal_error(&k, m2, tau, tail_start);
    for _ in 0..60 {
        if e1 < e2 {
            hi = m2;
            m2 = m1;
            e2 = e1;
            m1 = hi - phi * (hi - lo);
            e1 = removal_error(&k, m1, tau, tail_start);
        } else {
            lo = m1;
            m1 = m2;
            e1 = e2;
            m2 = lo + phi * (hi - lo);
            e2 = removal_error(&k, m2, tau, tail_start);
        }
    }
    let x_opt = (lo + hi) / 2.;
    debug!(x_opt, tau, "membrane-removal parameter");

    let y = membrane_filter(&k, x_opt, tau);
    let ke: Vec<f64> = (0..tail_start).map(|i| k[i] - y[i]).collect();
    Ok(ElectrodeKernel {
        ke: Array1::from(ke),
        km: Array1::from(y),
        tau,
    })
}

/// Subtracts the electrode artifact: `V - (Ke (*) I)` truncated to the
/// length of `V`. The voltage and current must come from the same
/// recording and therefore have the same length.
pub fn compensate(v: &[f64], i: &[f64], ke: &[f64]) -> Result<Array1<f64>> {
    if v.len() != i.len() {
        return Err(Error::Schema(format!(
            "voltage and current lengths differ ({} vs {})",
            v.len(),
            i.len()
        )));
    }
    let mut out = Array1::zeros(v.len());
    for n in 0..v.len() {
        let mut drop = 0.;
        let taps = ke.len().min(n + 1);
        for k in 0..taps {
            drop += ke[k] * i[n - k];
        }
        out[n] = v[n] - drop;
    }
    Ok(out)
}

/// Writes a kernel, scaled to GOhm, one value per line in scientific
/// notation. The engine reads this file verbatim at trial start.
pub fn save_kernel(path: impl AsRef<Path>, ke: &[f64]) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut contents = String::new();
    for value in ke {
        contents.push_str(&format!("{:.10e}\n", value * 1e9));
    }
    file.write_all(contents.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), taps = ke.len(), "saved electrode kernel");
    Ok(())
}

/// Reads a kernel file back into ohms.
pub fn load_kernel(path: impl AsRef<Path>) -> Result<Array1<f64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut values = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: f64 = line.parse().map_err(|_| {
            Error::Schema(format!("kernel file {}: bad value '{}'", path.display(), line))
        })?;
        values.push(value / 1e9);
    }
    Ok(Array1::from(values))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn toeplitz_identity() {
        // T = I: the solution is the right-hand side itself.
        let r = [1., 0., 0., 0.];
        let y = [4., 3., 2., 1.];
        let x = toeplitz_solve(&r, &y).unwrap();
        for (a, b) in x.iter().zip(y.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn toeplitz_small_dense_check() {
        // r = [2, 1, 0], i.e. tridiagonal [[2,1,0],[1,2,1],[0,1,2]].
        let r = [2., 1., 0.];
        let y = [1., 0., 1.];
        let x = toeplitz_solve(&r, &y).unwrap();
        let t = [[2., 1., 0.], [1., 2., 1.], [0., 1., 2.]];
        for row in 0..3 {
            let lhs: f64 = (0..3).map(|col| t[row][col] * x[col]).sum();
            assert!((lhs - y[row]).abs() < 1e-12, "row {}: {} vs {}", row, lhs, y[row]);
        }
    }

    #[test]
    fn degenerate_current_is_reported() {
        let v = vec![1.; 100];
        let i = vec![0.; 100];
        let err = full_kernel(&v, &i, 10).unwrap_err();
        assert!(matches!(err, Error::Degenerate(_)));
    }

    #[test]
    fn tail_fit_recovers_exponential() {
        let tau = 40.;
        let a = 2.5;
        let k: Vec<f64> = (0..200)
            .map(|t| {
                if t < 50 {
                    10. // irrelevant head
                } else {
                    a * (-((t - 50) as f64) / tau).exp()
                }
            })
            .collect();
        let (a_fit, tau_fit) = fit_tail(&k, 50).unwrap();
        assert!((a_fit - a).abs() < 1e-6);
        assert!((tau_fit - tau).abs() < 1e-4);
    }
}
