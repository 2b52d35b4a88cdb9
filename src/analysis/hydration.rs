//! Hydration dynamics from ODNP enhancement and T1 data.
//!
//! Given the enhancement `E(p)` and the relaxation time `T1(p)` measured
//! against microwave power, the solver
//! - interpolates `T1` onto the enhancement powers,
//! - fits the cross-relaxation product `k_σ·s(p)` to a saturation curve,
//! - turns `k_σ/k_ρ` into the translational correlation time `τ_c`
//!   through the force-free hard-sphere spectral density,
//! - derives `k_low`, the local diffusivity and ratios to bulk water.
//!
//! Units: `spin_c` in M, relaxation times in s, field in mT, `τ_c` in ps.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;

use crate::config::config;
use crate::data::{AttrValue, Attrs, NDData};
use crate::error::{DnpError, Result};
use crate::fitting::{brentq, curve_fit, FitOptions, RootOptions};
use crate::math::poly::{polyfit, polyval};
use crate::math::relaxation::saturation;

/// Electron gyromagnetic ratio in rad/(ps·T)
pub const GAMMA_E: f64 = 1.76085963023e-1;
/// Proton gyromagnetic ratio in rad/(ps·T)
pub const GAMMA_H: f64 = 2.6752218744e-4;

pub const KSIGMA_BULK: f64 = 95.4;
pub const KRHO_BULK: f64 = 353.4;
pub const KLOW_BULK: f64 = 366.0;
/// Bulk water correlation time in ps
pub const TCORR_BULK: f64 = 54.0;
/// Self-diffusivity of water in m²/s
pub const D_H2O: f64 = 2.3e-9;
/// Self-diffusivity of the spin label in m²/s
pub const D_SL: f64 = 4.1e-10;

// ─── Parameters ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmaxModel {
    /// Label tethered to a macromolecule, `s_max = 1`
    Tethered,
    /// Freely tumbling label, `s_max` from the spin concentration
    Free,
    Value(f64),
}

impl fmt::Display for SmaxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmaxModel::Tethered => write!(f, "tethered"),
            SmaxModel::Free => write!(f, "free"),
            SmaxModel::Value(v) => write!(f, "{}", v),
        }
    }
}

impl FromStr for SmaxModel {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tethered" => Ok(SmaxModel::Tethered),
            "free" => Ok(SmaxModel::Free),
            other => other
                .parse::<f64>()
                .map(SmaxModel::Value)
                .map_err(|_| DnpError::bad_argument(format!("unknown smax model '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum T1InterpMethod {
    Linear,
    SecondOrder,
}

impl fmt::Display for T1InterpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            T1InterpMethod::Linear => write!(f, "linear"),
            T1InterpMethod::SecondOrder => write!(f, "second_order"),
        }
    }
}

impl FromStr for T1InterpMethod {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(T1InterpMethod::Linear),
            "second_order" => Ok(T1InterpMethod::SecondOrder),
            _ => Err(DnpError::bad_argument(format!(
                "unknown T1 interpolation method '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HydrationParameters {
    /// Magnetic field in mT
    pub field: f64,
    /// Spin label concentration in M
    pub spin_c: f64,
    /// T1 without microwaves, with spin label
    pub t10: f64,
    /// T1 without microwaves or spin label
    pub t100: f64,
    pub smax_model: SmaxModel,
    pub t1_interp_method: T1InterpMethod,
    /// Second-order only: change of the water T1 over the power range
    pub delta_t1_water: Option<f64>,
    /// Second-order only: water T1, defaults to `t100`
    pub t1_water: Option<f64>,
    /// Second-order only: macromolecule concentration, defaults to `spin_c`
    pub macro_c: Option<f64>,
    /// Root-search bracket for `τ_c` in ps
    pub tcorr_bracket: (f64, f64),
}

impl HydrationParameters {
    /// Parameters with the configured model defaults
    pub fn new(field: f64, spin_c: f64, t10: f64, t100: f64) -> Self {
        let cfg = &config().hydration;
        let smax_model = cfg.smax_model.parse().unwrap_or_else(|e| {
            log::warn!("{}; using the tethered model", e);
            SmaxModel::Tethered
        });
        let t1_interp_method = cfg.t1_interp_method.parse().unwrap_or_else(|e| {
            log::warn!("{}; using second-order interpolation", e);
            T1InterpMethod::SecondOrder
        });
        Self {
            field,
            spin_c,
            t10,
            t100,
            smax_model,
            t1_interp_method,
            delta_t1_water: None,
            t1_water: None,
            macro_c: None,
            tcorr_bracket: (cfg.tcorr_bracket_ps[0], cfg.tcorr_bracket_ps[1]),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("field", self.field),
            ("spin_c", self.spin_c),
            ("t10", self.t10),
            ("t100", self.t100),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(DnpError::bad_argument(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        let (lo, hi) = self.tcorr_bracket;
        if !(lo > 0.0 && hi > lo) {
            return Err(DnpError::bad_argument(format!(
                "invalid tcorr bracket [{}, {}]",
                lo, hi
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HydrationResults {
    /// Coupling factor from fitting `E` directly, ignoring the power dependence of T1
    pub uncorrected_xi: f64,
    /// Enhancement curve of the uncorrected fit
    pub uncorrected_ep: Vec<f64>,
    /// T1 interpolated onto the enhancement powers
    pub interpolated_t1: Vec<f64>,
    /// `k_σ·s(p)` per enhancement power
    pub ksigma_array: Vec<f64>,
    /// Saturation fit of `ksigma_array`
    pub ksigma_fit: Vec<f64>,
    pub ksigma: f64,
    pub ksigma_stdd: f64,
    pub ksigma_bulk_ratio: f64,
    pub p_half: f64,
    pub krho: f64,
    pub krho_bulk_ratio: f64,
    pub klow: f64,
    pub klow_bulk_ratio: f64,
    pub coupling_factor: f64,
    pub tcorr: f64,
    pub tcorr_bulk_ratio: f64,
    pub dlocal: f64,
}

impl HydrationResults {
    /// Named mapping of every result, arrays included
    pub fn to_attrs(&self) -> Attrs {
        let mut out = Attrs::new();
        let mut put = |key: &str, value: AttrValue| {
            out.insert(key.to_string(), value);
        };
        put("uncorrected_xi", self.uncorrected_xi.into());
        put("uncorrected_Ep", self.uncorrected_ep.clone().into());
        put("interpolated_T1", self.interpolated_t1.clone().into());
        put("ksigma_array", self.ksigma_array.clone().into());
        put("ksigma_fit", self.ksigma_fit.clone().into());
        put("ksigma", self.ksigma.into());
        put("ksigma_stdd", self.ksigma_stdd.into());
        put("ksigma_bulk_ratio", self.ksigma_bulk_ratio.into());
        put("p_half", self.p_half.into());
        put("krho", self.krho.into());
        put("krho_bulk_ratio", self.krho_bulk_ratio.into());
        put("klow", self.klow.into());
        put("klow_bulk_ratio", self.klow_bulk_ratio.into());
        put("coupling_factor", self.coupling_factor.into());
        put("tcorr", self.tcorr.into());
        put("tcorr_bulk_ratio", self.tcorr_bulk_ratio.into());
        put("Dlocal", self.dlocal.into());
        out
    }
}

// ─── Model pieces ──────────────────────────────────────────────────────────

/// Theoretical maximum saturation factor
pub fn smax(model: SmaxModel, spin_c: f64) -> Result<f64> {
    match model {
        SmaxModel::Tethered => Ok(1.0),
        SmaxModel::Free => Ok(1.0 - 2.0 / (3.0 + 3.0 * 198.7 * spin_c)),
        SmaxModel::Value(v) if v > 0.0 && v <= 1.0 => Ok(v),
        SmaxModel::Value(v) => Err(DnpError::bad_argument(format!(
            "smax must be in (0, 1], got {}",
            v
        ))),
    }
}

/// Ratio of electron to proton Larmor frequencies
pub fn omega_ratio() -> f64 {
    GAMMA_E / GAMMA_H
}

/// Force-free hard-sphere spectral density in the reduced variable `z`
fn spectral_density(z: Complex64) -> f64 {
    let one = Complex64::new(1.0, 0.0);
    let num = one + z / 4.0;
    let den = one + z + z * z * (4.0 / 9.0) + z * z * z / 9.0;
    (num / den).re
}

/// Coupling factor predicted for correlation time `tcorr` (ps) at `field` (mT)
pub fn coupling_factor(tcorr: f64, field: f64) -> f64 {
    let omega_e = GAMMA_E * field / 1000.0;
    let omega_h = GAMMA_H * field / 1000.0;
    let z = |omega: f64| (Complex64::new(0.0, omega * tcorr)).sqrt();

    let j_diff = spectral_density(z(omega_e - omega_h));
    let j_sum = spectral_density(z(omega_e + omega_h));
    let j_h = spectral_density(z(omega_h));

    (6.0 * j_diff - j_sum) / (6.0 * j_diff + 3.0 * j_h + j_sum)
}

/// Correlation time (ps) whose predicted coupling factor equals `xi`
pub fn solve_tcorr(xi: f64, field: f64, bracket: (f64, f64)) -> Result<f64> {
    let options = RootOptions {
        xtol: 1e-9,
        ..Default::default()
    };
    brentq(|t| coupling_factor(t, field) - xi, bracket.0, bracket.1, &options)
}

// ─── T1 interpolation ──────────────────────────────────────────────────────

fn interpolate_t1_linear(
    e_power: &[f64],
    t1: &[f64],
    t1_power: &[f64],
    t10: f64,
    t100: f64,
) -> Result<Vec<f64>> {
    let y: Vec<f64> = t1
        .iter()
        .map(|&t| 1.0 / (1.0 / t - 1.0 / t10 + 1.0 / t100))
        .collect();
    let coeffs = polyfit(t1_power, &y, 1)?;
    Ok(e_power
        .iter()
        .map(|&p| {
            let y = polyval(&coeffs, p);
            y / (1.0 + y / t10 - y / t100)
        })
        .collect())
}

fn interpolate_t1_second_order(
    e_power: &[f64],
    t1: &[f64],
    t1_power: &[f64],
    params: &HydrationParameters,
) -> Result<Vec<f64>> {
    let spin_c = params.spin_c;
    let macro_c = params.macro_c.unwrap_or(spin_c);
    let t1_water = params.t1_water.unwrap_or(params.t100);
    let delta = params
        .delta_t1_water
        .unwrap_or(t1[t1.len() - 1] - t1[0]);

    let khh = (1.0 / params.t10 - 1.0 / t1_water) / macro_c;
    let krp: Vec<f64> = t1
        .iter()
        .zip(t1_power)
        .map(|(&t, &p)| (1.0 / t - 1.0 / (t1_water + delta * p) - khh * macro_c) / spin_c)
        .collect();
    let coeffs = polyfit(t1_power, &krp, 2)?;

    Ok(e_power
        .iter()
        .map(|&p| 1.0 / (spin_c * polyval(&coeffs, p) + 1.0 / (t1_water + delta * p) + khh * macro_c))
        .collect())
}

// ─── Solver ────────────────────────────────────────────────────────────────

fn check_pair(name: &str, values: &[f64], powers: &[f64]) -> Result<()> {
    if values.len() != powers.len() {
        return Err(DnpError::ShapeMismatch {
            expected: vec![powers.len()],
            got: vec![values.len()],
        });
    }
    if values.is_empty() {
        return Err(DnpError::bad_argument(format!("{} is empty", name)));
    }
    Ok(())
}

/// Run the full analysis on plain arrays
pub fn hydration_arrays(
    e: &[f64],
    e_power: &[f64],
    t1: &[f64],
    t1_power: &[f64],
    params: &HydrationParameters,
) -> Result<HydrationResults> {
    params.validate()?;
    check_pair("E", e, e_power)?;
    check_pair("T1", t1, t1_power)?;
    if t1.iter().any(|&t| !(t > 0.0)) {
        return Err(DnpError::bad_argument("T1 values must be positive"));
    }

    let smax = smax(params.smax_model, params.spin_c)?;
    let ratio = omega_ratio();

    let interpolated_t1 = match params.t1_interp_method {
        T1InterpMethod::Linear => interpolate_t1_linear(e_power, t1, t1_power, params.t10, params.t100)?,
        T1InterpMethod::SecondOrder => interpolate_t1_second_order(e_power, t1, t1_power, params)?,
    };

    let ksigma_array: Vec<f64> = e
        .iter()
        .zip(&interpolated_t1)
        .map(|(&e, &t1)| (1.0 - e) / (params.spin_c * ratio * t1))
        .collect();

    // ksigma·s(p) = (ksigma·smax)·p/(p_half + p)
    let max_power = e_power.iter().fold(0.0f64, |m, &p| m.max(p));
    let max_ks = ksigma_array.iter().fold(f64::NEG_INFINITY, |m, &k| m.max(k));
    let p0 = [max_ks, if max_power > 0.0 { max_power / 2.0 } else { 1.0 }];
    let ks_fit = curve_fit(saturation, None, e_power, &ksigma_array, &p0, &FitOptions::default())
        .map_err(|e| DnpError::fit_failed(format!("ksigma fit: {}", e)))?;
    let (ksmax, p_half) = (ks_fit.popt[0], ks_fit.popt[1]);
    if !(ksmax > 0.0) || !(p_half > 0.0) {
        return Err(DnpError::fit_failed(format!(
            "non-positive ksigma fit coefficients: ksigma·smax = {}, p_half = {}",
            ksmax, p_half
        )));
    }
    let ksigma = ksmax / smax;
    let ksigma_stdd = ks_fit.perr[0] / smax;
    let ksigma_fit: Vec<f64> = e_power.iter().map(|&p| saturation(p, &ks_fit.popt)).collect();

    let krho = (1.0 / params.t10 - 1.0 / params.t100) / params.spin_c;
    let xi = ksigma / krho;
    let tcorr = solve_tcorr(xi, params.field, params.tcorr_bracket)?;
    let dlocal = (TCORR_BULK / tcorr) * (D_H2O + D_SL);
    let klow = (5.0 * krho - 7.0 * ksigma) / 3.0;

    // E(p) = 1 − xi·(1 − T10/T100)·ratio·smax·p/(p_half + p)
    let leakage = 1.0 - params.t10 / params.t100;
    let uncorrected = |p: f64, q: &[f64]| 1.0 - q[0] * leakage * ratio * smax * p / (q[1] + p);
    let unc_fit = curve_fit(uncorrected, None, e_power, e, &[xi, p_half], &FitOptions::default())
        .map_err(|e| DnpError::fit_failed(format!("uncorrected enhancement fit: {}", e)))?;
    let uncorrected_ep: Vec<f64> = e_power.iter().map(|&p| uncorrected(p, &unc_fit.popt)).collect();

    log::debug!(
        "hydration: ksigma {:.4} ± {:.4}, krho {:.4}, xi {:.5}, tcorr {:.2} ps",
        ksigma,
        ksigma_stdd,
        krho,
        xi,
        tcorr
    );

    Ok(HydrationResults {
        uncorrected_xi: unc_fit.popt[0],
        uncorrected_ep,
        interpolated_t1,
        ksigma_array,
        ksigma_fit,
        ksigma,
        ksigma_stdd,
        ksigma_bulk_ratio: ksigma / KSIGMA_BULK,
        p_half,
        krho,
        krho_bulk_ratio: krho / KRHO_BULK,
        klow,
        klow_bulk_ratio: klow / KLOW_BULK,
        coupling_factor: xi,
        tcorr,
        tcorr_bulk_ratio: tcorr / TCORR_BULK,
        dlocal,
    })
}

/// Real part and coordinate of a 1-D dataset
fn lane(data: &NDData, name: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    if data.ndim() != 1 {
        return Err(DnpError::bad_argument(format!(
            "{} must be 1-D, got dims {:?}",
            name,
            data.dims()
        )));
    }
    let dim = data.dims()[0].to_string();
    let powers = data.coord(&dim)?.to_vec();
    let values = data.real().iter().copied().collect();
    Ok((values, powers))
}

/// Run the analysis on 1-D enhancement and T1 datasets indexed by power
pub fn hydration(enhancements: &NDData, t1: &NDData, params: &HydrationParameters) -> Result<HydrationResults> {
    let (e, e_power) = lane(enhancements, "enhancements")?;
    let (t1, t1_power) = lane(t1, "T1")?;
    hydration_arrays(&e, &e_power, &t1, &t1_power, params)
}
