/// Curve fitting on plain arrays and along one dim of an NDData
///
/// `fit` unfolds the data, fits the real part of every lane independently
/// and returns the evaluated model together with `popt`/`err` datasets whose
/// first dim is `"popt"`.
use ndarray::{Array1, Array2, Ix2};
use num_complex::Complex64;

use super::least_squares::{levenberg_marquardt, JacobianFn, LeastSquaresOptions};
use crate::data::nddata::UNFOLDED_DIM;
use crate::data::{Coords, NDData};
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;
use crate::math::{lineshape, relaxation, trapz_weights};

/// Name of the parameter dim on `popt` and `err`
pub const POPT_DIM: &str = "popt";

/// Model derivative `∂f(x)/∂p`, one entry per parameter
pub type ModelJacobian<'a> = &'a dyn Fn(f64, &[f64]) -> Vec<f64>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitOptions {
    pub least_squares: LeastSquaresOptions,
    /// Per-point standard deviation of the data
    pub sigma: Option<Vec<f64>>,
}

impl FitOptions {
    pub fn with_bounds(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        let mut options = Self::default();
        options.least_squares.bounds = Some((lower, upper));
        options
    }
}

#[derive(Debug, Clone)]
pub struct CurveFit {
    pub popt: Vec<f64>,
    /// One standard deviation per parameter, `sqrt(diag(cov))`
    pub perr: Vec<f64>,
    pub cov: Option<nalgebra::DMatrix<f64>>,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    /// Model evaluated at the fitted parameters, same dims as the input
    pub fit: NDData,
    pub popt: NDData,
    pub err: NDData,
}

// ─── Array fitting ─────────────────────────────────────────────────────────

/// Fit `f(x, p)` to `y` by least squares starting from `p0`
pub fn curve_fit<F>(
    f: F,
    jac: Option<ModelJacobian<'_>>,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    options: &FitOptions,
) -> Result<CurveFit>
where
    F: Fn(f64, &[f64]) -> f64,
{
    if x.len() != y.len() {
        return Err(DnpError::ShapeMismatch {
            expected: vec![x.len()],
            got: vec![y.len()],
        });
    }
    if x.len() < p0.len() {
        return Err(DnpError::bad_argument(format!(
            "{} points cannot determine {} parameters",
            x.len(),
            p0.len()
        )));
    }
    let weights: Vec<f64> = match &options.sigma {
        Some(s) if s.len() != x.len() => {
            return Err(DnpError::ShapeMismatch {
                expected: vec![x.len()],
                got: vec![s.len()],
            })
        }
        Some(s) if s.iter().any(|v| *v <= 0.0) => {
            return Err(DnpError::bad_argument("sigma must be positive"));
        }
        Some(s) => s.iter().map(|v| 1.0 / v).collect(),
        None => vec![1.0; x.len()],
    };

    let residual = |p: &[f64]| -> Vec<f64> {
        x.iter()
            .zip(y)
            .zip(&weights)
            .map(|((&xi, &yi), &w)| (f(xi, p) - yi) * w)
            .collect()
    };
    let residual_jac = |p: &[f64]| -> Vec<Vec<f64>> {
        match jac {
            Some(j) => x
                .iter()
                .zip(&weights)
                .map(|(&xi, &w)| j(xi, p).into_iter().map(|d| d * w).collect())
                .collect(),
            None => Vec::new(),
        }
    };
    let jacobian: Option<JacobianFn<'_>> = if jac.is_some() { Some(&residual_jac) } else { None };

    let result = levenberg_marquardt(residual, jacobian, p0, &options.least_squares)?;
    if !result.converged {
        return Err(DnpError::fit_failed(format!(
            "no convergence after {} iterations",
            result.iterations
        )));
    }
    if result.x.iter().any(|v| !v.is_finite()) {
        return Err(DnpError::fit_failed("parameters are not finite"));
    }

    let cov = result.covariance();
    let perr = result.standard_errors();
    Ok(CurveFit {
        popt: result.x,
        perr,
        cov,
        cost: result.cost,
    })
}

// ─── NDData fitting ────────────────────────────────────────────────────────

fn fit_lanes<F>(
    model: &str,
    f: F,
    jac: Option<ModelJacobian<'_>>,
    data: &NDData,
    dim: &str,
    p0: &[f64],
    options: &FitOptions,
) -> Result<FitResult>
where
    F: Fn(f64, &[f64]) -> f64,
{
    if p0.is_empty() {
        return Err(DnpError::bad_argument("p0 must not be empty"));
    }
    if data.is_complex() {
        log::debug!("fit: imaginary part along '{}' is ignored", dim);
    }
    let x = data.coord(dim)?.to_vec();
    let unfolded = data.unfold(dim)?;
    let values = unfolded.values().view().into_dimensionality::<Ix2>()?;
    let (n, m) = values.dim();
    let k = p0.len();

    let mut fitted = Array2::<Complex64>::zeros((n, m));
    let mut popt = Array2::<Complex64>::zeros((k, m));
    let mut perr = Array2::<Complex64>::zeros((k, m));
    for j in 0..m {
        let y: Vec<f64> = values.column(j).iter().map(|v| v.re).collect();
        let result = curve_fit(&f, jac, &x, &y, p0, options)?;
        for (i, &xi) in x.iter().enumerate() {
            fitted[[i, j]] = Complex64::new(f(xi, &result.popt), 0.0);
        }
        for p in 0..k {
            popt[[p, j]] = Complex64::new(result.popt[p], 0.0);
            perr[[p, j]] = Complex64::new(result.perr[p], 0.0);
        }
        log::debug!("fit {} lane {}: popt {:?} perr {:?}", model, j, result.popt, result.perr);
    }

    let mut fit = unfolded
        .with_parts(fitted.into_dyn(), unfolded.coords().clone())?
        .fold()?;

    let mut param_coords = Coords::new();
    param_coords.append(POPT_DIM, Array1::range(0.0, k as f64, 1.0))?;
    param_coords.append(UNFOLDED_DIM, Array1::range(0.0, m as f64, 1.0))?;
    let popt = unfolded
        .with_parts(popt.into_dyn(), param_coords.clone())?
        .fold()?
        .reorder(&[POPT_DIM])?;
    let err = unfolded
        .with_parts(perr.into_dyn(), param_coords)?
        .fold()?
        .reorder(&[POPT_DIM])?;

    fit.record(
        ProcStep::new("fit")
            .param("dim", dim)
            .param("model", model)
            .param("p0", p0),
    );
    Ok(FitResult { fit, popt, err })
}

/// Fit `f(x, p)` to the real part of every lane along `dim`
pub fn fit<F>(f: F, data: &NDData, dim: &str, p0: &[f64], options: &FitOptions) -> Result<FitResult>
where
    F: Fn(f64, &[f64]) -> f64,
{
    fit_lanes("custom", f, None, data, dim, p0, options)
}

/// `fit` with an analytic model Jacobian
pub fn fit_with_jacobian<F>(
    f: F,
    jac: ModelJacobian<'_>,
    data: &NDData,
    dim: &str,
    p0: &[f64],
    options: &FitOptions,
) -> Result<FitResult>
where
    F: Fn(f64, &[f64]) -> f64,
{
    fit_lanes("custom", f, Some(jac), data, dim, p0, options)
}

// ─── Specialised fits ──────────────────────────────────────────────────────

/// First lane along `dim` sorted by coordinate, used for initial guesses
fn first_lane(data: &NDData, dim: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    let x = data.coord(dim)?.to_vec();
    let unfolded = data.unfold(dim)?;
    let values = unfolded.values().view().into_dimensionality::<Ix2>()?;
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(values.column(0).iter())
        .map(|(&x, v)| (x, v.re))
        .collect();
    if pairs.len() < 2 {
        return Err(DnpError::bad_argument(format!(
            "dimension '{}' needs at least 2 points to fit",
            dim
        )));
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(pairs.into_iter().unzip())
}

/// Coordinate at which `y` has covered half of its total change
fn half_change(x: &[f64], y: &[f64]) -> f64 {
    let first = y[0];
    let total = y[y.len() - 1] - first;
    let span = x[x.len() - 1] - x[0];
    let crossing = x
        .iter()
        .zip(y)
        .find(|(_, &v)| (v - first).abs() >= total.abs() / 2.0)
        .map_or(0.0, |(&xi, _)| xi - x[0]);
    if crossing > 0.0 {
        crossing
    } else if span > 0.0 {
        span / 2.0
    } else {
        1.0
    }
}

/// Inversion-recovery T1, parameters `[T1, M0, M_inf]`
pub fn fit_t1(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            let m0 = y[y.len() - 1];
            vec![half_change(&x, &y) / std::f64::consts::LN_2, m0, m0 - y[0]]
        }
    };
    fit_lanes("t1", relaxation::t1, None, data, dim, &guess, &FitOptions::default())
}

/// Stretched T2 decay, parameters `[T2, M0, p]`
pub fn fit_t2_stretched(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            vec![2.0 * half_change(&x, &y) / std::f64::consts::LN_2, y[0], 1.0]
        }
    };
    fit_lanes(
        "t2_stretched",
        relaxation::t2_stretched,
        None,
        data,
        dim,
        &guess,
        &FitOptions::default(),
    )
}

/// `C1 + C2·exp(−t/tau)`, parameters `[C1, C2, tau]`
pub fn fit_mono_exp(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            let c1 = y[y.len() - 1];
            vec![c1, y[0] - c1, half_change(&x, &y) / std::f64::consts::LN_2]
        }
    };
    fit_lanes("mono_exp", relaxation::mono_exp, None, data, dim, &guess, &FitOptions::default())
}

/// Two exponentials, parameters `[C1, C2, C3, tau1, tau2]`
pub fn fit_bi_exp(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            let c1 = y[y.len() - 1];
            let tau = half_change(&x, &y) / std::f64::consts::LN_2;
            let amp = (y[0] - c1) / 2.0;
            vec![c1, amp, amp, tau / 3.0, tau * 3.0]
        }
    };
    fit_lanes("bi_exp", relaxation::bi_exp, None, data, dim, &guess, &FitOptions::default())
}

/// Polarization buildup, parameters `[C, tau]`
pub fn fit_buildup(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            vec![y[y.len() - 1], half_change(&x, &y) / std::f64::consts::LN_2]
        }
    };
    fit_lanes("buildup", relaxation::buildup, None, data, dim, &guess, &FitOptions::default())
}

/// Saturation curve `E_max·p/(p_half + p)`, parameters `[E_max, p_half]`
pub fn fit_saturation(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            vec![y[y.len() - 1], half_change(&x, &y)]
        }
    };
    fit_lanes(
        "saturation",
        relaxation::saturation,
        None,
        data,
        dim,
        &guess,
        &FitOptions::default(),
    )
}

/// `C1 + C2·exp(−(t/tau)^p)`, parameters `[C1, C2, tau, p]`
pub fn fit_stretched_exp(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let (x, y) = first_lane(data, dim)?;
            let c1 = y[y.len() - 1];
            vec![c1, y[0] - c1, half_change(&x, &y) / std::f64::consts::LN_2, 1.0]
        }
    };
    fit_lanes(
        "stretched_exp",
        relaxation::stretched_exp,
        None,
        data,
        dim,
        &guess,
        &FitOptions::default(),
    )
}

/// Peak position, full width at half maximum and area of the first lane
fn peak_guess(data: &NDData, dim: &str) -> Result<[f64; 3]> {
    let (x, y) = first_lane(data, dim)?;
    let (peak, height) = y
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |b, (i, &v)| if v > b.1 { (i, v) } else { b });
    let above: Vec<f64> = x
        .iter()
        .zip(&y)
        .filter(|&(_, &v)| v >= height / 2.0)
        .map(|(&x, _)| x)
        .collect();
    let step = (x[x.len() - 1] - x[0]) / (x.len() - 1) as f64;
    let width = match (above.first(), above.last()) {
        (Some(lo), Some(hi)) if hi > lo => hi - lo,
        _ => step,
    };
    let area: f64 = trapz_weights(&x).iter().zip(&y).map(|(w, v)| w * v).sum();
    Ok([x[peak], width, area])
}

/// Single Lorentzian peak, parameters `[x0, fwhm, area]`
pub fn fit_lorentzian(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => peak_guess(data, dim)?.to_vec(),
    };
    let model = |x: f64, p: &[f64]| lineshape::lorentzian(x, p[0], p[1], p[2]);
    fit_lanes("lorentzian", model, None, data, dim, &guess, &FitOptions::default())
}

/// Single Gaussian peak, parameters `[x0, sigma, area]`
pub fn fit_gaussian(data: &NDData, dim: &str, p0: Option<&[f64]>) -> Result<FitResult> {
    let guess = match p0 {
        Some(p) => p.to_vec(),
        None => {
            let [x0, fwhm, area] = peak_guess(data, dim)?;
            vec![x0, fwhm / (8.0 * std::f64::consts::LN_2).sqrt(), area]
        }
    };
    let model = |x: f64, p: &[f64]| lineshape::gaussian(x, p[0], p[1], p[2]);
    fit_lanes("gaussian", model, None, data, dim, &guess, &FitOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn recovery(t1s: &[f64]) -> NDData {
        let t = Array1::linspace(0.01, 5.0, 40);
        let values = Array2::from_shape_fn((t.len(), t1s.len()), |(i, j)| {
            relaxation::t1(t[i], &[t1s[j], 2.0, 4.0])
        });
        NDData::from_real(
            values.into_dyn(),
            &["t1", "power"],
            vec![t, Array1::range(0.0, t1s.len() as f64, 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_curve_fit_with_and_without_jacobian() {
        let x: Vec<f64> = (0..30).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&x| relaxation::buildup(x, &[3.0, 0.7])).collect();
        let plain = curve_fit(relaxation::buildup, None, &x, &y, &[1.0, 1.0], &FitOptions::default()).unwrap();
        assert_abs_diff_eq!(plain.popt[0], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(plain.popt[1], 0.7, epsilon = 1e-6);

        let jac = |x: f64, p: &[f64]| {
            let e = (-x / p[1]).exp();
            vec![1.0 - e, -p[0] * x * e / (p[1] * p[1])]
        };
        let analytic = curve_fit(relaxation::buildup, Some(&jac), &x, &y, &[1.0, 1.0], &FitOptions::default()).unwrap();
        assert_abs_diff_eq!(analytic.popt[1], 0.7, epsilon = 1e-6);
    }

    #[test]
    fn test_curve_fit_argument_checks() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 1.0];
        assert!(matches!(
            curve_fit(relaxation::saturation, None, &x, &y, &[1.0, 1.0], &FitOptions::default()),
            Err(DnpError::ShapeMismatch { .. })
        ));
        let options = FitOptions {
            sigma: Some(vec![1.0, 0.0, 1.0]),
            ..Default::default()
        };
        assert!(curve_fit(relaxation::saturation, None, &x, &[0.0, 1.0, 2.0], &[1.0, 1.0], &options).is_err());
    }

    #[test]
    fn test_fit_every_lane() {
        let data = recovery(&[0.5, 1.0, 1.5]);
        let result = fit(relaxation::t1, &data, "t1", &[1.0, 1.0, 1.0], &FitOptions::default()).unwrap();

        assert_eq!(result.fit.dims(), vec!["t1", "power"]);
        assert_eq!(result.popt.dims(), vec![POPT_DIM, "power"]);
        assert_eq!(result.err.shape(), vec![3, 3]);
        for (j, expected) in [0.5, 1.0, 1.5].iter().enumerate() {
            assert_abs_diff_eq!(result.popt.values()[[0, j]].re, *expected, epsilon = 1e-6);
            assert_abs_diff_eq!(result.popt.values()[[1, j]].re, 2.0, epsilon = 1e-6);
        }
        for (a, b) in result.fit.values().iter().zip(data.values().iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-6);
        }
        assert_eq!(result.fit.proc_attrs.step_names(), vec!["fit"]);
    }

    #[test]
    fn test_fit_dim_not_first() {
        let data = recovery(&[0.8, 1.2]).reorder(&["power"]).unwrap();
        let result = fit_t1(&data, "t1", None).unwrap();
        assert_eq!(result.fit.dims(), vec!["power", "t1"]);
        assert_eq!(result.popt.dims(), vec![POPT_DIM, "power"]);
        assert_abs_diff_eq!(result.popt.values()[[0, 1]].re, 1.2, epsilon = 1e-6);
        assert_eq!(
            result.fit.proc_attrs.last().unwrap().get("model").and_then(|v| v.as_str()),
            Some("t1")
        );
    }

    #[test]
    fn test_specialised_wrappers() {
        let p = Array1::linspace(0.0, 2.0, 25);
        let e = p.mapv(|x| relaxation::saturation(x, &[-20.0, 0.3]));
        let data = NDData::from_real_1d("power", p.clone(), e).unwrap();
        let sat = fit_saturation(&data, "power", None).unwrap();
        assert_abs_diff_eq!(sat.popt.values()[[0]].re, -20.0, epsilon = 1e-5);
        assert_abs_diff_eq!(sat.popt.values()[[1]].re, 0.3, epsilon = 1e-6);

        let t = Array1::linspace(0.0, 0.1, 30);
        let decay = t.mapv(|x| relaxation::t2_stretched(x, &[0.02, 5.0, 1.0]));
        let data = NDData::from_real_1d("t", t.clone(), decay).unwrap();
        let t2 = fit_t2_stretched(&data, "t", None).unwrap();
        assert_abs_diff_eq!(t2.popt.values()[[0]].re, 0.02, epsilon = 1e-6);

        let mono = t.mapv(|x| relaxation::mono_exp(x, &[1.0, 4.0, 0.03]));
        let data = NDData::from_real_1d("t", t, mono).unwrap();
        let fitted = fit_mono_exp(&data, "t", None).unwrap();
        assert_abs_diff_eq!(fitted.popt.values()[[2]].re, 0.03, epsilon = 1e-6);
    }

    #[test]
    fn test_peak_and_stretched_fits() {
        let x = Array1::linspace(-10.0, 10.0, 201);
        let y = x.mapv(|v| lineshape::lorentzian(v, 1.3, 2.0, 5.0));
        let data = NDData::from_real_1d("f2", x, y).unwrap();
        let peak = fit_lorentzian(&data, "f2", None).unwrap();
        assert_abs_diff_eq!(peak.popt.values()[[0]].re, 1.3, epsilon = 1e-6);
        assert_abs_diff_eq!(peak.popt.values()[[1]].re, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(peak.popt.values()[[2]].re, 5.0, epsilon = 1e-5);

        let x = Array1::linspace(-5.0, 5.0, 101);
        let y = x.mapv(|v| lineshape::gaussian(v, -0.4, 0.6, 2.0));
        let data = NDData::from_real_1d("f2", x, y).unwrap();
        let peak = fit_gaussian(&data, "f2", None).unwrap();
        assert_abs_diff_eq!(peak.popt.values()[[1]].re, 0.6, epsilon = 1e-6);

        let t = Array1::linspace(0.0, 3.0, 60);
        let y = t.mapv(|v| relaxation::stretched_exp(v, &[0.5, 2.0, 0.8, 0.7]));
        let data = NDData::from_real_1d("t", t, y).unwrap();
        let fitted = fit_stretched_exp(&data, "t", None).unwrap();
        assert_abs_diff_eq!(fitted.popt.values()[[3]].re, 0.7, epsilon = 1e-5);
    }

    #[test]
    fn test_bi_exp_and_buildup_from_guess() {
        let t = Array1::linspace(0.0, 10.0, 200);
        let y = t.mapv(|v| relaxation::bi_exp(v, &[1.0, 2.0, 1.0, 0.2, 2.0]));
        let data = NDData::from_real_1d("t", t, y).unwrap();
        let two = fit_bi_exp(&data, "t", None).unwrap();
        for (k, expected) in [1.0, 2.0, 1.0, 0.2, 2.0].iter().enumerate() {
            assert_abs_diff_eq!(two.popt.values()[[k]].re, *expected, epsilon = 1e-4);
        }

        let t = Array1::linspace(0.0, 8.0, 50);
        let y = t.mapv(|v| relaxation::buildup(v, &[5.0, 1.5]));
        let data = NDData::from_real_1d("t", t, y).unwrap();
        let built = fit_buildup(&data, "t", None).unwrap();
        assert_abs_diff_eq!(built.popt.values()[[0]].re, 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(built.popt.values()[[1]].re, 1.5, epsilon = 1e-6);
        assert_eq!(
            built.fit.proc_attrs.last().unwrap().get("model").and_then(|v| v.as_str()),
            Some("buildup")
        );
    }

    #[test]
    fn test_half_change() {
        let x = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(half_change(&x, &[0.0, 0.2, 0.6, 1.0]), 2.0);
        assert_eq!(half_change(&x, &[1.0, 1.0, 1.0, 1.0]), 1.5);
        assert!(fit_buildup(&NDData::from_real_1d("t", array![0.0], array![1.0]).unwrap(), "t", None).is_err());
    }
}
