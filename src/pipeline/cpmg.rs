/// CPMG echo train handling
///
/// Echo positions are snapped to whole dwell times so every integration
/// window starts and ends on a sample.

use ndarray::{Axis, Ix2};

use super::integrate::{integrate_regions, Regions, INTEGRALS_DIM};
use super::processing::dwell_time;
use crate::data::nddata::range_indices;
use crate::data::NDData;
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;

/// Integration windows for an echo train
#[derive(Debug, Clone, PartialEq)]
pub struct CpmgWindows {
    /// `(lo, hi)` per echo, in coordinate units
    pub regions: Vec<(f64, f64)>,
    /// Echo centres
    pub centres: Vec<f64>,
    /// `+1`/`−1` per echo when alternating, otherwise all `+1`
    pub signs: Vec<f64>,
    /// Snapped noise window, if one was requested
    pub noise_region: Option<(f64, f64)>,
}

fn snap(value: f64, dt: f64) -> f64 {
    (value / dt).round() * dt
}

/// Time of the largest `|signal|` inside `region`, a whole multiple of the dwell time
pub fn cpmg_detect_first_echo(data: &NDData, dim: &str, region: (f64, f64)) -> Result<f64> {
    let dt = dwell_time(data, dim)?;
    let coord = data.coord(dim)?;
    let (start, stop) = range_indices(coord, region.0, region.1);

    // Sum |values| over every other dim
    let unfolded = data.unfold(dim)?;
    let view = unfolded.values().view().into_dimensionality::<Ix2>()?;
    let magnitude = view.map_axis(Axis(1), |row| row.iter().map(|v| v.norm()).sum::<f64>());

    let mut best = start;
    for i in start..=stop {
        if magnitude[i] > magnitude[best] {
            best = i;
        }
    }
    Ok(snap(coord[best], dt))
}

/// Integration windows centred on `n_echo` echoes starting at `t_start`
#[allow(clippy::too_many_arguments)]
pub fn cpmg_show_integration_region(
    data: &NDData,
    dim: &str,
    n_echo: usize,
    t_start: f64,
    t_period: f64,
    t_width: f64,
    noise_region: Option<(f64, f64)>,
    alternate: bool,
) -> Result<CpmgWindows> {
    if n_echo == 0 {
        return Err(DnpError::bad_argument("n_echo must be at least 1"));
    }
    let dt = dwell_time(data, dim)?;
    let t_start = snap(t_start, dt);
    let t_period = snap(t_period, dt);
    let t_width = snap(t_width, dt);
    if t_period <= 0.0 || t_width <= 0.0 {
        return Err(DnpError::bad_argument(
            "t_period and t_width must be at least one dwell time",
        ));
    }

    // Half-width on whole samples keeps both edges off half-sample ties
    let half = snap(t_width / 2.0, dt);
    let centres: Vec<f64> = (0..n_echo).map(|k| t_start + k as f64 * t_period).collect();
    let regions: Vec<(f64, f64)> = centres
        .iter()
        .map(|&c| (c - half, c + half))
        .collect();
    let signs = (0..n_echo)
        .map(|k| if alternate && k % 2 == 1 { -1.0 } else { 1.0 })
        .collect();

    let noise_region = noise_region.map(|(lo, hi)| (snap(lo, dt), snap(hi, dt)));
    if let Some((lo, hi)) = noise_region {
        if regions.iter().any(|&(a, b)| lo < b && a < hi) {
            log::warn!("Noise region ({}, {}) overlaps an echo window", lo, hi);
        }
    }

    let last = data.coord(dim)?.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if let Some(&(_, hi)) = regions.last() {
        if hi > last + dt / 2.0 {
            log::warn!("Last echo window ends at {} beyond the data ({})", hi, last);
        }
    }

    Ok(CpmgWindows {
        regions,
        centres,
        signs,
        noise_region,
    })
}

/// Integrate every echo window; with `alternate` echo `k` is multiplied by `(−1)^k`
pub fn cpmg_integrate(data: &NDData, dim: &str, regions: &[(f64, f64)], alternate: bool) -> Result<NDData> {
    let mut out = integrate_regions(data, dim, &Regions::Many(regions.to_vec()))?;
    if alternate {
        let axis = Axis(out.index(INTEGRALS_DIM)?);
        let mut values = out.values_mut();
        for (k, mut lane) in values.axis_iter_mut(axis).enumerate() {
            if k % 2 == 1 {
                lane.mapv_inplace(|v| -v);
            }
        }
    }
    out.record(
        ProcStep::new("cpmg_integrate")
            .param("dim", dim)
            .param("regions", regions.iter().flat_map(|&(lo, hi)| [lo, hi]).collect::<Vec<f64>>())
            .param("alternate", alternate),
    );
    Ok(out)
}
