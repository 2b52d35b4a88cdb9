/// Zero- and first-order phase correction
///
/// The phase is estimated on an optional reference window and always
/// applied to the whole dataset. Data is corrected by multiplying with
/// `exp(−i·φ)`, so `φ` is the phase present in the data.

use std::f64::consts::PI;
use std::str::FromStr;

use ndarray::{Array1, Axis, Ix2, Slice};
use num_complex::Complex64;

use super::map_lanes;
use crate::config::config;
use crate::data::{NDData, Selector};
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseMethod {
    /// `φ₀ = atan(Σ im / Σ re)`
    Arctan,
    /// Grid search over `[−π/2, π/2]` maximising real over imaginary power
    Search,
    /// Supplied phase: one value for zero order, one per point for first order
    Manual(Vec<f64>),
}

impl FromStr for PhaseMethod {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arctan" => Ok(PhaseMethod::Arctan),
            "search" => Ok(PhaseMethod::Search),
            "manual" => Err(DnpError::bad_argument("manual phasing needs a phase value")),
            other => Err(DnpError::bad_argument(format!("unknown phase method '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOrder {
    Zero,
    First,
}

impl FromStr for PhaseOrder {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(PhaseOrder::Zero),
            "first" => Ok(PhaseOrder::First),
            other => Err(DnpError::bad_argument(format!("unknown phase order '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutophaseOptions {
    pub method: PhaseMethod,
    pub order: PhaseOrder,
    /// Coordinate window along `dim` used for the estimate
    pub reference_range: Option<(f64, f64)>,
    /// Columns of the unfolded data used for the estimate; ignored on 1-D data
    pub reference_slice: Option<std::ops::Range<usize>>,
    /// First-order pivot index
    pub pivot: usize,
    /// First-order phase swing across the dim, radians
    pub delta: f64,
    pub force_positive: bool,
    /// Grid size for `Search`
    pub search_points: usize,
}

impl Default for AutophaseOptions {
    fn default() -> Self {
        let cfg = &config().autophase;
        let method = cfg.method.parse().unwrap_or_else(|e| {
            log::warn!("Configured phase method ignored: {}", e);
            PhaseMethod::Search
        });
        Self {
            method,
            order: PhaseOrder::Zero,
            reference_range: None,
            reference_slice: None,
            pivot: 0,
            delta: 0.0,
            force_positive: cfg.force_positive,
            search_points: cfg.search_points,
        }
    }
}

/// Phase that maximises `Σ re² / Σ im²` after removing it
fn search_phase(values: &[Complex64], points: usize) -> f64 {
    let lo = -PI / 2.0;
    let step = if points > 1 { PI / (points - 1) as f64 } else { 0.0 };
    let mut best = (lo, f64::NEG_INFINITY);
    for k in 0..points.max(1) {
        let phi = lo + k as f64 * step;
        let rot = Complex64::from_polar(1.0, -phi);
        let (re2, im2) = values.iter().fold((0.0, 0.0), |(r, i), v| {
            let c = v * rot;
            (r + c.re * c.re, i + c.im * c.im)
        });
        let ratio = re2 / im2;
        let ratio = if ratio.is_nan() { f64::NEG_INFINITY } else { ratio };
        if ratio > best.1 {
            best = (phi, ratio);
        }
    }
    best.0
}

fn arctan_phase(values: &[Complex64]) -> Result<f64> {
    let total: Complex64 = values.iter().sum();
    let phase = (total.im / total.re).atan();
    if !phase.is_finite() {
        return Err(DnpError::bad_argument(format!(
            "arctan phase undefined for reference sum {}",
            total
        )));
    }
    Ok(phase)
}

/// Values the estimate is computed from
fn reference_values(data: &NDData, dim: &str, options: &AutophaseOptions) -> Result<Vec<Complex64>> {
    let windowed = match options.reference_range {
        Some(range) => data.select(&[(dim, Selector::from(range))])?,
        None => data.clone(),
    };
    let unfolded = windowed.unfold(dim)?;
    let view = unfolded.values().view().into_dimensionality::<Ix2>()?;

    let columns = match &options.reference_slice {
        Some(_) if data.ndim() == 1 => {
            log::warn!("reference_slice ignored for one-dimensional data");
            view
        }
        Some(range) => {
            if range.start >= range.end || range.end > view.ncols() {
                return Err(DnpError::bad_argument(format!(
                    "reference_slice {:?} out of range for {} columns",
                    range,
                    view.ncols()
                )));
            }
            view.slice_axis_move(Axis(1), Slice::from(range.clone()))
        }
        None => view,
    };
    Ok(columns.iter().copied().collect())
}

/// Estimate the zero-order phase of `data` along `dim`
pub fn estimate_phase(data: &NDData, dim: &str, options: &AutophaseOptions) -> Result<f64> {
    let values = reference_values(data, dim, options)?;
    Ok(match &options.method {
        PhaseMethod::Arctan => arctan_phase(&values)?,
        PhaseMethod::Search => search_phase(&values, options.search_points),
        PhaseMethod::Manual(phase) => *phase
            .first()
            .ok_or_else(|| DnpError::bad_argument("manual phase is empty"))?,
    })
}

/// Phase to remove at every point along `dim`
fn phase_profile(data: &NDData, dim: &str, options: &AutophaseOptions) -> Result<Array1<f64>> {
    let n = data.len_of(dim)?;
    if let (PhaseMethod::Manual(phase), PhaseOrder::First) = (&options.method, options.order) {
        if phase.len() != n {
            return Err(DnpError::ShapeMismatch {
                expected: vec![n],
                got: vec![phase.len()],
            });
        }
        return Ok(Array1::from_vec(phase.clone()));
    }
    if let PhaseMethod::Manual(phase) = &options.method {
        if phase.len() != 1 {
            return Err(DnpError::bad_argument(
                "zero-order manual phase takes exactly one value",
            ));
        }
    }

    let phi0 = estimate_phase(data, dim, options)?;
    Ok(match options.order {
        PhaseOrder::Zero => Array1::from_elem(n, phi0),
        PhaseOrder::First => {
            let pivot_ratio = options.pivot as f64 / n as f64;
            Array1::from_shape_fn(n, |i| {
                phi0 - options.delta * pivot_ratio + options.delta * (i as f64 / n as f64)
            })
        }
    })
}

/// Phase-correct `data` along `dim`
pub fn autophase(data: &NDData, dim: &str, options: &AutophaseOptions) -> Result<NDData> {
    let phase = phase_profile(data, dim, options)?;
    let factors = phase.mapv(|p| Complex64::from_polar(1.0, -p));
    let coord = data.coord(dim)?.clone();
    let mut out = map_lanes(data, dim, coord, |lane| Ok(&lane * &factors))?;

    let mut negated = false;
    if options.force_positive {
        let total: f64 = out.values().iter().map(|v| v.re).sum();
        if total < 0.0 {
            out.values_mut().mapv_inplace(|v| -v);
            negated = true;
        }
    }

    let method = match &options.method {
        PhaseMethod::Arctan => "arctan",
        PhaseMethod::Search => "search",
        PhaseMethod::Manual(_) => "manual",
    };
    let order = match options.order {
        PhaseOrder::Zero => "zero",
        PhaseOrder::First => "first",
    };
    out.record(
        ProcStep::new("autophase")
            .param("dim", dim)
            .param("method", method)
            .param("order", order)
            .param("phase", phase[0])
            .param("delta", options.delta)
            .param("pivot", options.pivot)
            .param("force_positive", negated),
    );
    Ok(out)
}
