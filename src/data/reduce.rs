/// Reductions along one dimension
///
/// Each reduction drops the reduced dim and returns data of rank − 1.
/// Comparisons (`max`, `min`, `argmax`, `argmin`) use the real part.

use ndarray::{Array1, ArrayD, ArrayView1, Axis};
use num_complex::Complex64;

use super::nddata::NDData;
use crate::error::Result;

impl NDData {
    pub(crate) fn reduce_with<F>(&self, dim: &str, f: F) -> Result<NDData>
    where
        F: Fn(ArrayView1<'_, Complex64>, &Array1<f64>) -> Complex64,
    {
        let axis = self.index(dim)?;
        let coord = self.coord(dim)?.clone();
        let values: ArrayD<Complex64> = self
            .values()
            .map_axis(Axis(axis), |lane| f(lane, &coord));
        let mut coords = self.coords().clone();
        coords.pop(dim)?;
        self.with_parts(values, coords)
    }

    pub fn sum(&self, dim: &str) -> Result<NDData> {
        let mut out = self.reduce_with(dim, |lane, _| lane.iter().sum())?;
        if let Some(e) = self.error() {
            let axis = Axis(self.index(dim)?);
            out.set_error(Some(e.map_axis(axis, |lane| {
                lane.iter().map(|v| v * v).sum::<f64>().sqrt()
            })))?;
        }
        Ok(out)
    }

    pub fn mean(&self, dim: &str) -> Result<NDData> {
        let n = self.len_of(dim)? as f64;
        let mut out = self.reduce_with(dim, |lane, _| lane.iter().sum::<Complex64>() / n)?;
        if let Some(e) = self.error() {
            let axis = Axis(self.index(dim)?);
            out.set_error(Some(e.map_axis(axis, |lane| {
                lane.iter().map(|v| v * v).sum::<f64>().sqrt() / n
            })))?;
        }
        Ok(out)
    }

    pub fn max(&self, dim: &str) -> Result<NDData> {
        self.reduce_with(dim, |lane, _| lane[extreme_index(&lane, true)])
    }

    pub fn min(&self, dim: &str) -> Result<NDData> {
        self.reduce_with(dim, |lane, _| lane[extreme_index(&lane, false)])
    }

    /// Coordinate value at the maximum
    pub fn argmax(&self, dim: &str) -> Result<NDData> {
        self.reduce_with(dim, |lane, coord| {
            Complex64::new(coord[extreme_index(&lane, true)], 0.0)
        })
    }

    /// Coordinate value at the minimum
    pub fn argmin(&self, dim: &str) -> Result<NDData> {
        self.reduce_with(dim, |lane, coord| {
            Complex64::new(coord[extreme_index(&lane, false)], 0.0)
        })
    }
}

/// Index of the largest (or smallest) real part in a 1-D lane
fn extreme_index(lane: &ArrayView1<'_, Complex64>, largest: bool) -> usize {
    let mut best = 0;
    for (i, v) in lane.iter().enumerate() {
        let current = lane[best].re;
        let better = if largest { v.re > current } else { v.re < current };
        if better {
            best = i;
        }
    }
    best
}
