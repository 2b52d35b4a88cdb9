/// Elementary processing operators
///
/// Offset and background removal, apodization, shifting and
/// referencing, resampling, receiver phase cycling, power unit
/// conversion and enhancement calculation. Each operator returns a new
/// dataset and records itself in `proc_attrs`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Axis, Slice};
use num_complex::Complex64;

use super::{map_lanes, spacing};
use crate::config::config;
use crate::data::nddata::range_indices;
use crate::data::{AttrValue, NDData};
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;
use crate::math::poly::{self, polyfit, polyval};
use crate::math::window::{self as kernels, WindowKind, WindowParams};

// ─── Offset ────────────────────────────────────────────────────────────────

/// Subtract the mean of the last `offset_points` samples along `dim`.
///
/// `None` takes the configured default (10 points).
pub fn remove_offset(data: &NDData, dim: &str, offset_points: Option<usize>) -> Result<NDData> {
    let requested = offset_points.unwrap_or(config().offset.offset_points);
    if requested == 0 {
        return Err(DnpError::bad_argument("offset_points must be at least 1"));
    }
    let n = data.len_of(dim)?;
    let points = requested.min(n);
    let coord = data.coord(dim)?.clone();

    let mut out = map_lanes(data, dim, coord, |lane| {
        let tail = lane.slice_axis(Axis(0), Slice::from(n - points..));
        let offset = tail.iter().sum::<Complex64>() / points as f64;
        Ok(lane.mapv(|v| v - offset))
    })?;
    out.record(
        ProcStep::new("remove_offset")
            .param("dim", dim)
            .param("offset_points", points),
    );
    Ok(out)
}

// ─── Apodization ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WindowOptions {
    pub kind: WindowKind,
    pub linewidth: f64,
    pub gauss_linewidth: f64,
    pub gaussian_max: f64,
    /// Divide by the window instead of multiplying
    pub inverse: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        let cfg = &config().window;
        let kind = cfg.kind.parse().unwrap_or_else(|e| {
            log::warn!("Configured window ignored: {}", e);
            WindowKind::Exponential
        });
        Self {
            kind,
            linewidth: cfg.linewidth,
            gauss_linewidth: cfg.gauss_linewidth,
            gaussian_max: cfg.gaussian_max,
            inverse: false,
        }
    }
}

/// Multiply (or divide) along `dim` by a window kernel
pub fn apodize(data: &NDData, dim: &str, options: &WindowOptions) -> Result<NDData> {
    let coord = data.coord(dim)?.clone();
    let params = WindowParams {
        linewidth: options.linewidth,
        gauss_linewidth: options.gauss_linewidth,
        gaussian_max: options.gaussian_max,
    };
    let w = kernels::window(options.kind, &coord, &params);

    let mut out = map_lanes(data, dim, coord, |lane| {
        Ok(if options.inverse {
            &lane / &w.mapv(|v| Complex64::new(v, 0.0))
        } else {
            &lane * &w.mapv(|v| Complex64::new(v, 0.0))
        })
    })?;
    out.record(
        ProcStep::new("window")
            .param("dim", dim)
            .param("type", options.kind.name())
            .param("linewidth", options.linewidth)
            .param("gauss_linewidth", options.gauss_linewidth)
            .param("gaussian_max", options.gaussian_max)
            .param("inverse", options.inverse),
    );
    Ok(out)
}

// ─── Shift / reference / resample ──────────────────────────────────────────

/// Drop the first `shift_points` samples along `dim`
pub fn left_shift(data: &NDData, dim: &str, shift_points: usize) -> Result<NDData> {
    let n = data.len_of(dim)?;
    if shift_points >= n {
        return Err(DnpError::bad_argument(format!(
            "cannot shift {} points from dimension '{}' of length {}",
            shift_points, dim, n
        )));
    }
    let coord = data.coord(dim)?.slice_axis(Axis(0), Slice::from(shift_points..)).to_owned();
    let mut out = map_lanes(data, dim, coord, |lane| {
        Ok(lane.slice_axis(Axis(0), Slice::from(shift_points..)).to_owned())
    })?;
    out.record(
        ProcStep::new("left_shift")
            .param("dim", dim)
            .param("shift_points", shift_points),
    );
    Ok(out)
}

/// Shift the coordinate of `dim` by `new_ref − old_ref`
pub fn reference(data: &NDData, dim: &str, old_ref: f64, new_ref: f64) -> Result<NDData> {
    let shifted = data.coord(dim)?.mapv(|v| v + new_ref - old_ref);
    let mut out = data.clone();
    out.set_coord(dim, shifted)?;
    out.record(
        ProcStep::new("reference")
            .param("dim", dim)
            .param("old_ref", old_ref)
            .param("new_ref", new_ref),
    );
    Ok(out)
}

/// Linear resampling along `dim` onto `new_coord`.
///
/// Points outside the original range take `left` / `right`, or the
/// edge values when those are `None`.
pub fn interp(
    data: &NDData,
    dim: &str,
    new_coord: Array1<f64>,
    left: Option<f64>,
    right: Option<f64>,
) -> Result<NDData> {
    if new_coord.is_empty() {
        return Err(DnpError::bad_argument("interp needs a non-empty coordinate"));
    }
    let coord = data.coord(dim)?;
    let descending = coord.len() > 1 && coord[0] > coord[coord.len() - 1];
    let xp: Vec<f64> = if descending {
        coord.iter().rev().copied().collect()
    } else {
        coord.to_vec()
    };

    let targets = new_coord.clone();
    let mut out = map_lanes(data, dim, new_coord, |lane| {
        let mut values: Vec<Complex64> = lane.to_vec();
        if descending {
            values.reverse();
        }
        let re: Vec<f64> = values.iter().map(|v| v.re).collect();
        let im: Vec<f64> = values.iter().map(|v| v.im).collect();
        Ok(targets.mapv(|x| {
            Complex64::new(
                poly::interp(x, &xp, &re, left, right),
                poly::interp(x, &xp, &im, left.map(|_| 0.0), right.map(|_| 0.0)),
            )
        }))
    })?;
    out.record(
        ProcStep::new("interp")
            .param("dim", dim)
            .param("points", targets.len())
            .param("left", left)
            .param("right", right),
    );
    Ok(out)
}

/// Mean along `dim`; the dim is dropped
pub fn average(data: &NDData, dim: &str) -> Result<NDData> {
    let mut out = data.mean(dim)?;
    out.record(ProcStep::new("average").param("dim", dim));
    Ok(out)
}

// ─── Baseline ──────────────────────────────────────────────────────────────

/// Subtract a polynomial baseline of degree `deg` along `dim`.
///
/// With `regions` the polynomial is fitted only to points inside the
/// union of those coordinate windows; it is always subtracted
/// everywhere.
pub fn remove_background(
    data: &NDData,
    dim: &str,
    deg: usize,
    regions: Option<&[(f64, f64)]>,
) -> Result<NDData> {
    let coord = data.coord(dim)?.clone();
    let mut mask = vec![regions.is_none(); coord.len()];
    if let Some(regions) = regions {
        for &(lo, hi) in regions {
            let (start, stop) = range_indices(&coord, lo, hi);
            for m in &mut mask[start..=stop] {
                *m = true;
            }
        }
    }
    let x: Vec<f64> = coord
        .iter()
        .zip(&mask)
        .filter(|&(_, &m)| m)
        .map(|(&v, _)| v)
        .collect();

    let mut out = map_lanes(data, dim, coord.clone(), |lane| {
        let (re, im): (Vec<f64>, Vec<f64>) = lane
            .iter()
            .zip(&mask)
            .filter(|&(_, &m)| m)
            .map(|(v, _)| (v.re, v.im))
            .unzip();
        let c_re = polyfit(&x, &re, deg)?;
        let c_im = polyfit(&x, &im, deg)?;
        Ok(Array1::from_shape_fn(lane.len(), |i| {
            let base = Complex64::new(polyval(&c_re, coord[i]), polyval(&c_im, coord[i]));
            lane[i] - base
        }))
    })?;

    let mut step = ProcStep::new("remove_background").param("dim", dim).param("deg", deg);
    step = match regions {
        Some(r) => step.param(
            "regions",
            r.iter().flat_map(|&(lo, hi)| [lo, hi]).collect::<Vec<f64>>(),
        ),
        None => step.param("regions", AttrValue::None),
    };
    out.record(step);
    Ok(out)
}

// ─── Receiver phase cycling ────────────────────────────────────────────────

/// Multiply slice `k` along `dim` by `exp(−i·π/2·rx[k])`, tiling `rx`
pub fn phase_cycle(data: &NDData, dim: &str, receiver_phase: &[f64]) -> Result<NDData> {
    if receiver_phase.is_empty() {
        return Err(DnpError::bad_argument("receiver_phase must not be empty"));
    }
    let n = data.len_of(dim)?;
    let factors: Array1<Complex64> = Array1::from_shape_fn(n, |k| {
        let rx = receiver_phase[k % receiver_phase.len()];
        Complex64::from_polar(1.0, -PI / 2.0 * rx)
    });
    let coord = data.coord(dim)?.clone();
    let mut out = map_lanes(data, dim, coord, |lane| Ok(&lane * &factors))?;
    out.record(
        ProcStep::new("phase_cycle")
            .param("dim", dim)
            .param("receiver_phase", receiver_phase),
    );
    Ok(out)
}

// ─── Power axis ────────────────────────────────────────────────────────────

/// Powers at or below this many watts are treated as zero
pub const MIN_POWER_W: f64 = 1e-22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerConversion {
    DbmToW,
    WToDbm,
}

impl PowerConversion {
    fn target_unit(&self) -> &'static str {
        match self {
            PowerConversion::DbmToW => "W",
            PowerConversion::WToDbm => "dBm",
        }
    }
}

impl fmt::Display for PowerConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerConversion::DbmToW => write!(f, "dBm2W"),
            PowerConversion::WToDbm => write!(f, "W2dBm"),
        }
    }
}

impl FromStr for PowerConversion {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dbm2w" | "dbm_to_w" => Ok(PowerConversion::DbmToW),
            "w2dbm" | "w_to_dbm" => Ok(PowerConversion::WToDbm),
            other => Err(DnpError::bad_argument(format!("unknown power conversion '{}'", other))),
        }
    }
}

pub fn dbm_to_w(dbm: f64) -> f64 {
    let w = 10f64.powf(dbm / 10.0) / 1000.0;
    if w <= MIN_POWER_W {
        0.0
    } else {
        w
    }
}

pub fn w_to_dbm(w: f64) -> f64 {
    10.0 * (1000.0 * w.max(MIN_POWER_W)).log10()
}

/// Convert the `power` coordinate between dBm and W.
///
/// When `dnplab_attrs["power_unit"]` already names the target unit the
/// data is returned unchanged (with a warning).
pub fn convert_power(data: &NDData, mode: PowerConversion) -> Result<NDData> {
    let target = mode.target_unit();
    let current = data.dnplab_attrs.get("power_unit").and_then(|v| v.as_str());
    if current == Some(target) {
        log::warn!("Power axis is already in {}; nothing converted", target);
        return Ok(data.clone());
    }

    let converted = match mode {
        PowerConversion::DbmToW => data.coord("power")?.mapv(dbm_to_w),
        PowerConversion::WToDbm => data.coord("power")?.mapv(w_to_dbm),
    };
    let mut out = data.clone();
    out.set_coord("power", converted)?;
    out.dnplab_attrs.insert("power_unit".to_string(), target.into());
    out.record(ProcStep::new("convert_power").param("mode", mode.to_string()));
    Ok(out)
}

// ─── Enhancement / signal-to-noise ─────────────────────────────────────────

/// Divide every slice along `dim` by the slice at `off_index`
pub fn calculate_enhancement(data: &NDData, dim: &str, off_index: usize) -> Result<NDData> {
    let n = data.len_of(dim)?;
    if off_index >= n {
        return Err(DnpError::bad_argument(format!(
            "off_index {} out of range for dimension '{}' of length {}",
            off_index, dim, n
        )));
    }
    let coord = data.coord(dim)?.clone();
    let mut out = map_lanes(data, dim, coord, |lane| {
        let off = lane[off_index];
        Ok(lane.mapv(|v| v / off))
    })?;
    out.record(
        ProcStep::new("calculate_enhancement")
            .param("dim", dim)
            .param("off_index", off_index),
    );
    Ok(out)
}

/// Peak real value in `signal_region` over the standard deviation of
/// the real part in `noise_region`, per lane; `dim` is dropped.
pub fn signal_to_noise(
    data: &NDData,
    dim: &str,
    signal_region: (f64, f64),
    noise_region: (f64, f64),
) -> Result<NDData> {
    let coord = data.coord(dim)?;
    let (s0, s1) = range_indices(coord, signal_region.0, signal_region.1);
    let (n0, n1) = range_indices(coord, noise_region.0, noise_region.1);
    if n1 == n0 {
        return Err(DnpError::bad_argument("noise region must span at least two points"));
    }

    let mut out = data.reduce_with(dim, |lane, _| {
        let signal = lane
            .iter()
            .skip(s0)
            .take(s1 - s0 + 1)
            .fold(f64::NEG_INFINITY, |m, v| m.max(v.re));
        let noise: Vec<f64> = lane.iter().skip(n0).take(n1 - n0 + 1).map(|v| v.re).collect();
        let mean = noise.iter().sum::<f64>() / noise.len() as f64;
        let var = noise.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / noise.len() as f64;
        Complex64::new(signal / var.sqrt(), 0.0)
    })?;
    out.record(
        ProcStep::new("signal_to_noise")
            .param("dim", dim)
            .param("signal_region", signal_region)
            .param("noise_region", noise_region),
    );
    Ok(out)
}

/// Dwell time of `dim`, used by callers snapping to sample positions
pub fn dwell_time(data: &NDData, dim: &str) -> Result<f64> {
    spacing(data.coord(dim)?, dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn fid() -> NDData {
        let t = Array1::linspace(0.0, 1.0, 50);
        let y = t.mapv(|v: f64| (-v / 0.2).exp() + 0.5);
        NDData::from_real_1d("t2", t, y).unwrap()
    }

    #[test]
    fn test_remove_offset_idempotent() {
        let data = fid();
        let once = remove_offset(&data, "t2", Some(10)).unwrap();
        let twice = remove_offset(&once, "t2", Some(10)).unwrap();
        for (a, b) in once.values().iter().zip(twice.values().iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
        }
        assert_eq!(twice.proc_attrs.step_names(), vec!["remove_offset", "remove_offset"]);
        assert!(data.proc_attrs.is_empty());
    }

    #[test]
    fn test_remove_offset_rejects_zero() {
        assert!(remove_offset(&fid(), "t2", Some(0)).is_err());
        assert!(matches!(
            remove_offset(&fid(), "f2", Some(3)),
            Err(DnpError::UnknownDim(_))
        ));
    }

    #[test]
    fn test_apodize_inverse_restores() {
        let data = fid();
        let options = WindowOptions {
            kind: WindowKind::Exponential,
            linewidth: 3.0,
            gauss_linewidth: 0.0,
            gaussian_max: 0.0,
            inverse: false,
        };
        let windowed = apodize(&data, "t2", &options).unwrap();
        assert_abs_diff_eq!(
            windowed.values()[[49]].re,
            data.values()[[49]].re * (-6.0f64).exp(),
            epsilon = 1e-12
        );
        let restored = apodize(&windowed, "t2", &WindowOptions { inverse: true, ..options }).unwrap();
        for (a, b) in restored.values().iter().zip(data.values().iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_left_shift_and_reference() {
        let data = fid();
        let shifted = left_shift(&data, "t2", 5).unwrap();
        assert_eq!(shifted.len_of("t2").unwrap(), 45);
        assert_eq!(shifted.values()[[0]], data.values()[[5]]);
        assert!(left_shift(&data, "t2", 50).is_err());

        let moved = reference(&data, "t2", 0.0, 2.0).unwrap();
        assert_abs_diff_eq!(moved.coord("t2").unwrap()[0], 2.0);
        assert_eq!(moved.values(), data.values());
    }

    #[test]
    fn test_interp_linear() {
        let data = NDData::from_real_1d("x", array![0.0, 1.0, 2.0], array![0.0, 2.0, 4.0]).unwrap();
        let out = interp(&data, "x", array![0.5, 1.5, 3.0], None, Some(-1.0)).unwrap();
        assert_abs_diff_eq!(out.values()[[0]].re, 1.0);
        assert_abs_diff_eq!(out.values()[[1]].re, 3.0);
        assert_abs_diff_eq!(out.values()[[2]].re, -1.0);
    }

    #[test]
    fn test_remove_background_linear() {
        let x = Array1::linspace(0.0, 10.0, 101);
        let peak = x.mapv(|v: f64| if (v - 5.0).abs() < 0.5 { 10.0 } else { 0.0 });
        let y = &peak + &x.mapv(|v| 0.3 * v + 1.0);
        let data = NDData::from_real_1d("f2", x, y).unwrap();
        let out = remove_background(&data, "f2", 1, Some(&[(0.0, 3.0), (7.0, 10.0)])).unwrap();
        assert_abs_diff_eq!(out.values()[[0]].re, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.values()[[100]].re, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.values()[[50]].re, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_phase_cycle_tiles() {
        let values = Array2::from_elem((3, 4), Complex64::new(1.0, 0.0));
        let data = NDData::new(
            values.into_dyn(),
            &["t2", "Average"],
            vec![array![0.0, 1.0, 2.0], array![0.0, 1.0, 2.0, 3.0]],
        )
        .unwrap();
        let out = phase_cycle(&data, "Average", &[0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(out.values()[[0, 0]].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[0, 1]].im, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[2, 3]].im, -1.0, epsilon = 1e-12);
        assert!(phase_cycle(&data, "Average", &[]).is_err());
    }

    #[test]
    fn test_convert_power() {
        let data = NDData::from_real_1d("power", array![-300.0, 0.0, 30.0], array![1.0, 2.0, 3.0]).unwrap();
        let watts = convert_power(&data, PowerConversion::DbmToW).unwrap();
        let p = watts.coord("power").unwrap();
        assert_eq!(p[0], 0.0);
        assert_abs_diff_eq!(p[1], 1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(p[2], 1.0, epsilon = 1e-12);
        assert_eq!(watts.dnplab_attrs.get("power_unit").and_then(|v| v.as_str()), Some("W"));

        // Already in watts: unchanged
        let again = convert_power(&watts, PowerConversion::DbmToW).unwrap();
        assert_eq!(again.coord("power").unwrap(), p);

        let back = convert_power(&watts, PowerConversion::WToDbm).unwrap();
        assert_abs_diff_eq!(back.coord("power").unwrap()[2], 30.0, epsilon = 1e-9);
        assert!(back.coord("power").unwrap()[0].is_finite());
        assert_eq!("W2dBm".parse::<PowerConversion>().unwrap(), PowerConversion::WToDbm);
    }

    #[test]
    fn test_enhancement_and_snr() {
        let data = NDData::from_real_1d("power", array![0.0, 1.0, 2.0], array![2.0, -4.0, -10.0]).unwrap();
        let e = calculate_enhancement(&data, "power", 0).unwrap();
        assert_eq!(e.real().iter().copied().collect::<Vec<f64>>(), vec![1.0, -2.0, -5.0]);
        assert!(calculate_enhancement(&data, "power", 3).is_err());

        let x = Array1::linspace(0.0, 9.0, 10);
        let y = array![5.0, 0.0, 0.0, 0.0, 0.0, 1.0, -1.0, 1.0, -1.0, 1.0];
        let spec = NDData::from_real_1d("f2", x, y).unwrap();
        let snr = signal_to_noise(&spec, "f2", (0.0, 1.0), (5.0, 8.0)).unwrap();
        assert_eq!(snr.ndim(), 0);
        assert_abs_diff_eq!(snr.item().unwrap().re, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_operators_preserve_other_dims() {
        let values = Array2::from_shape_fn((20, 3), |(i, j)| (i + j) as f64);
        let data = NDData::from_real(
            values.into_dyn(),
            &["power", "t2"],
            vec![Array1::linspace(0.0, 1.0, 20), array![0.0, 0.1, 0.2]],
        )
        .unwrap();
        let out = left_shift(&data, "t2", 1).unwrap();
        assert_eq!(out.dims(), vec!["power", "t2"]);
        assert_eq!(out.shape(), vec![20, 2]);
        assert_eq!(out.values()[[4, 0]].re, 5.0);
        assert!(!out.is_unfolded());
    }
}
