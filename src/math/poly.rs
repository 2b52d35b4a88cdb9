/// Polynomial least squares and linear interpolation
use nalgebra::{DMatrix, DVector};

use crate::error::{DnpError, Result};

/// Least-squares polynomial of degree `deg`.
///
/// Coefficients are returned lowest power first: `c[0] + c[1]·x + …`.
pub fn polyfit(x: &[f64], y: &[f64], deg: usize) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(DnpError::ShapeMismatch {
            expected: vec![x.len()],
            got: vec![y.len()],
        });
    }
    if x.len() <= deg {
        return Err(DnpError::bad_argument(format!(
            "degree {} polynomial needs more than {} points",
            deg,
            x.len()
        )));
    }
    // Scale x to keep the Vandermonde matrix well conditioned
    let scale = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let scale = if scale > 0.0 { scale } else { 1.0 };

    let a = DMatrix::from_fn(x.len(), deg + 1, |i, j| (x[i] / scale).powi(j as i32));
    let b = DVector::from_column_slice(y);
    let coeffs = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|e| DnpError::fit_failed(format!("polynomial fit: {}", e)))?;

    Ok(coeffs
        .iter()
        .enumerate()
        .map(|(j, c)| c / scale.powi(j as i32))
        .collect())
}

/// Evaluate a lowest-power-first polynomial (Horner)
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be increasing. Points left of `xp[0]` take `left`
/// (default `fp[0]`), points right of the last node take `right`
/// (default the last `fp`).
pub fn interp(x: f64, xp: &[f64], fp: &[f64], left: Option<f64>, right: Option<f64>) -> f64 {
    let n = xp.len();
    if n == 0 {
        return f64::NAN;
    }
    if x < xp[0] {
        return left.unwrap_or(fp[0]);
    }
    if x > xp[n - 1] {
        return right.unwrap_or(fp[n - 1]);
    }
    // First node strictly greater than x
    let hi = xp.partition_point(|&v| v <= x);
    if hi == 0 {
        return fp[0];
    }
    if hi >= n {
        return fp[n - 1];
    }
    let lo = hi - 1;
    let w = (x - xp[lo]) / (xp[hi] - xp[lo]);
    fp[lo] + w * (fp[hi] - fp[lo])
}
