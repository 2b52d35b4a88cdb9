//! Levenberg–Marquardt for small nonlinear least-squares problems.
//!
//! Minimises `Σ r_i(x)²` for a residual function `r: Rⁿ → Rᵐ`. The
//! Jacobian is either supplied or estimated by forward differences.
//! Box bounds are enforced by clamping every trial point.

use nalgebra::{DMatrix, DVector};

use crate::config::config;
use crate::error::{DnpError, Result};

const ZERO_THRESHOLD: f64 = 1e-30;

/// Residual Jacobian, row `i` is `∂r_i/∂x`
pub type JacobianFn<'a> = &'a dyn Fn(&[f64]) -> Vec<Vec<f64>>;

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresOptions {
    pub max_iterations: usize,
    /// Relative cost reduction below which the search stops
    pub ftol: f64,
    /// Relative step size below which the search stops
    pub xtol: f64,
    /// Relative step for finite-difference derivatives
    pub eps: f64,
    /// Lower and upper bound per parameter
    pub bounds: Option<(Vec<f64>, Vec<f64>)>,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        let cfg = &config().fit;
        Self {
            max_iterations: cfg.max_iterations,
            ftol: cfg.ftol,
            xtol: cfg.xtol,
            eps: 1.49e-8,
            bounds: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeastSquaresResult {
    pub x: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Sum of squared residuals
    pub cost: f64,
    /// Jacobian at the solution
    pub jacobian: DMatrix<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl LeastSquaresResult {
    /// Parameter covariance `s²·(JᵀJ)⁻¹` with `s² = cost / (m − n)`.
    ///
    /// `None` when the problem has no degrees of freedom or `JᵀJ` is singular.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        let m = self.residuals.len();
        let n = self.x.len();
        if m <= n {
            return None;
        }
        let jtj = self.jacobian.transpose() * &self.jacobian;
        let inv = jtj.try_inverse()?;
        Some(inv * (self.cost / (m - n) as f64))
    }

    /// One standard deviation per parameter; infinite when undetermined
    pub fn standard_errors(&self) -> Vec<f64> {
        match self.covariance() {
            Some(cov) => (0..self.x.len()).map(|i| cov[(i, i)].abs().sqrt()).collect(),
            None => vec![f64::INFINITY; self.x.len()],
        }
    }
}

fn clamp(x: &mut [f64], bounds: &Option<(Vec<f64>, Vec<f64>)>) {
    if let Some((lo, hi)) = bounds {
        for (i, v) in x.iter_mut().enumerate() {
            *v = v.clamp(lo[i], hi[i]);
        }
    }
}

fn finite_difference_jacobian<F>(f: &F, x: &[f64], fx: &[f64], eps: f64) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let m = fx.len();
    let n = x.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut xp = x.to_vec();
    for j in 0..n {
        let h = eps * x[j].abs().max(1.0);
        xp[j] = x[j] + h;
        let fp = f(&xp);
        for i in 0..m {
            jac[(i, j)] = (fp[i] - fx[i]) / h;
        }
        xp[j] = x[j];
    }
    jac
}

fn norm_squared(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// Minimise `Σ f(x)²` starting from `x0`
pub fn levenberg_marquardt<F>(
    f: F,
    jac: Option<JacobianFn<'_>>,
    x0: &[f64],
    options: &LeastSquaresOptions,
) -> Result<LeastSquaresResult>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = x0.len();
    if n == 0 {
        return Err(DnpError::bad_argument("empty initial guess"));
    }
    if let Some((lo, hi)) = &options.bounds {
        if lo.len() != n || hi.len() != n {
            return Err(DnpError::bad_argument(format!(
                "bounds need {} lower and upper values",
                n
            )));
        }
        if lo.iter().zip(hi).any(|(a, b)| a > b) {
            return Err(DnpError::bad_argument("lower bound above upper bound"));
        }
    }

    let jacobian_at = |x: &[f64], fx: &[f64]| -> Result<DMatrix<f64>> {
        match jac {
            Some(j) => {
                let rows = j(x);
                if rows.len() != fx.len() || rows.iter().any(|r| r.len() != n) {
                    return Err(DnpError::bad_argument("Jacobian has the wrong shape"));
                }
                Ok(DMatrix::from_fn(fx.len(), n, |i, k| rows[i][k]))
            }
            None => Ok(finite_difference_jacobian(&f, x, fx, options.eps)),
        }
    };

    let mut x = x0.to_vec();
    clamp(&mut x, &options.bounds);
    let mut fx = f(&x);
    let m = fx.len();
    if m == 0 {
        return Err(DnpError::bad_argument("residual function returned nothing"));
    }
    let mut cost = norm_squared(&fx);
    if !cost.is_finite() {
        return Err(DnpError::fit_failed("residuals are not finite at the initial guess"));
    }

    let mut lambda = 1e-3;
    let mut jacobian = jacobian_at(&x, &fx)?;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;

        let jt = jacobian.transpose();
        let jtj = &jt * &jacobian;
        let g = &jt * DVector::from_column_slice(&fx);

        let mut a = jtj.clone();
        for i in 0..n {
            a[(i, i)] = (jtj[(i, i)] * (1.0 + lambda)).max(ZERO_THRESHOLD);
        }
        let dx = match a.lu().solve(&(-&g)) {
            Some(dx) => dx,
            None => {
                lambda *= 10.0;
                continue;
            }
        };

        let mut x_new: Vec<f64> = x.iter().zip(dx.iter()).map(|(a, b)| a + b).collect();
        clamp(&mut x_new, &options.bounds);
        let fx_new = f(&x_new);
        let cost_new = norm_squared(&fx_new);

        if cost_new.is_finite() && cost_new <= cost {
            let step: f64 = x_new
                .iter()
                .zip(&x)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            let scale = norm_squared(&x).sqrt();
            let reduction = if cost > 0.0 { (cost - cost_new) / cost } else { 0.0 };

            x = x_new;
            fx = fx_new;
            cost = cost_new;
            jacobian = jacobian_at(&x, &fx)?;
            lambda = (lambda * 0.1).max(ZERO_THRESHOLD);

            if reduction <= options.ftol || step <= options.xtol * (scale + options.xtol) || cost == 0.0 {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e16 {
                // No downhill step exists at this scale
                converged = true;
                break;
            }
        }
    }

    log::debug!(
        "levenberg_marquardt: cost {:.3e} after {} iterations (converged: {})",
        cost,
        iterations,
        converged
    );

    Ok(LeastSquaresResult {
        x,
        residuals: fx,
        cost,
        jacobian,
        iterations,
        converged,
    })
}
