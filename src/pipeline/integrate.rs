/// Trapezoidal integration along one dim
use ndarray::{Array1, ArrayD, Axis, Slice};
use num_complex::Complex64;

use super::map_lanes;
use crate::data::nddata::{range_indices, stack};
use crate::data::NDData;
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;
use crate::math::trapz_weights;

/// Name of the dim created by multi-region integration
pub const INTEGRALS_DIM: &str = "integrals";

#[derive(Debug, Clone, PartialEq)]
pub enum Regions {
    /// Whole extent of the dim
    Full,
    /// One coordinate window
    One(f64, f64),
    /// Several windows, stacked along `"integrals"`
    Many(Vec<(f64, f64)>),
}

impl From<(f64, f64)> for Regions {
    fn from(r: (f64, f64)) -> Self {
        Regions::One(r.0, r.1)
    }
}

impl From<Vec<(f64, f64)>> for Regions {
    fn from(r: Vec<(f64, f64)>) -> Self {
        Regions::Many(r)
    }
}

impl Regions {
    fn flattened(&self) -> Option<Vec<f64>> {
        match self {
            Regions::Full => None,
            Regions::One(lo, hi) => Some(vec![*lo, *hi]),
            Regions::Many(r) => Some(r.iter().flat_map(|&(lo, hi)| [lo, hi]).collect()),
        }
    }
}

/// Integrate the whole of `dim`; the dim is dropped
fn integrate_full(data: &NDData, dim: &str) -> Result<NDData> {
    let coord = data.coord(dim)?;
    let weights = trapz_weights(&coord.to_vec());
    let mut out = data.reduce_with(dim, |lane, _| {
        lane.iter().zip(&weights).map(|(v, w)| v * *w).sum()
    })?;
    if let Some(e) = data.error() {
        let axis = Axis(data.index(dim)?);
        let err: ArrayD<f64> = e.map_axis(axis, |lane| {
            lane.iter()
                .zip(&weights)
                .map(|(v, w)| (v * w).powi(2))
                .sum::<f64>()
                .sqrt()
        });
        out.set_error(Some(err))?;
    }
    Ok(out)
}

fn integrate_window(data: &NDData, dim: &str, lo: f64, hi: f64) -> Result<NDData> {
    let (start, stop) = range_indices(data.coord(dim)?, lo, hi);
    let window = data.select(&[(dim, Slice::from(start..stop + 1).into())])?;
    integrate_full(&window, dim)
}

/// Integration without a history entry
pub(crate) fn integrate_regions(data: &NDData, dim: &str, regions: &Regions) -> Result<NDData> {
    match regions {
        Regions::Full => integrate_full(data, dim),
        Regions::One(lo, hi) => integrate_window(data, dim, *lo, *hi),
        Regions::Many(list) => {
            if list.is_empty() {
                return Err(DnpError::bad_argument("no integration regions given"));
            }
            let parts = list
                .iter()
                .map(|&(lo, hi)| integrate_window(data, dim, lo, hi))
                .collect::<Result<Vec<_>>>()?;
            let index = Array1::from_shape_fn(list.len(), |k| k as f64);
            stack(&parts, INTEGRALS_DIM, index)
        }
    }
}

/// Trapezoidal integral along `dim`.
///
/// `Full` and `One` drop `dim`; `Many` replaces it with an
/// `"integrals"` dim indexed `0, 1, …`.
pub fn integrate(data: &NDData, dim: &str, regions: &Regions) -> Result<NDData> {
    let mut out = integrate_regions(data, dim, regions)?;
    out.record(
        ProcStep::new("integrate")
            .param("dim", dim)
            .param("regions", regions.flattened()),
    );
    Ok(out)
}

/// Running trapezoidal integral; `dim` keeps its length and coordinate
pub fn cumulative_integrate(data: &NDData, dim: &str) -> Result<NDData> {
    let coord = data.coord(dim)?.clone();
    let x = coord.to_vec();
    let mut out = map_lanes(data, dim, coord, |lane| {
        let mut acc = Complex64::new(0.0, 0.0);
        let mut running = Vec::with_capacity(lane.len());
        for i in 0..lane.len() {
            if i > 0 {
                acc += (lane[i] + lane[i - 1]) * (0.5 * (x[i] - x[i - 1]));
            }
            running.push(acc);
        }
        Ok(Array1::from_vec(running))
    })?;
    out.record(ProcStep::new("cumulative_integrate").param("dim", dim));
    Ok(out)
}
