/// Fourier and inverse Fourier transform along one dim
///
/// The forward transform turns a time axis `t<n>` into a frequency axis
/// `f<n>` (in ppm when the NMR frequency is known), the inverse does the
/// opposite. With a zero-fill factor of one the pair round-trips exactly.

use lazy_static::lazy_static;
use ndarray::Array1;
use num_complex::Complex64;
use regex::Regex;
use rustfft::FftPlanner;

use super::{map_lanes, spacing};
use crate::config::config;
use crate::data::NDData;
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;

lazy_static! {
    static ref TIME_DIM: Regex = Regex::new(r"^t(\d+)$").unwrap();
    static ref FREQ_DIM: Regex = Regex::new(r"^f(\d+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct FourierOptions {
    pub zero_fill_factor: usize,
    /// Centre zero frequency
    pub shift: bool,
    /// Express the new axis in ppm when `nmr_frequency` is set
    pub convert_to_ppm: bool,
}

impl Default for FourierOptions {
    fn default() -> Self {
        let cfg = &config().fourier;
        Self {
            zero_fill_factor: cfg.zero_fill_factor,
            shift: cfg.shift,
            convert_to_ppm: cfg.convert_to_ppm,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InverseFourierOptions {
    pub zero_fill_factor: usize,
    /// The frequency axis was centred by the forward transform
    pub shift: bool,
    /// The frequency axis is in ppm and must be converted back to Hz
    pub convert_from_ppm: bool,
}

impl Default for InverseFourierOptions {
    fn default() -> Self {
        let cfg = &config().fourier;
        Self {
            zero_fill_factor: cfg.zero_fill_factor,
            shift: cfg.shift,
            convert_from_ppm: cfg.convert_to_ppm,
        }
    }
}

/// `out[j] = x[(j − n/2) mod n]`
fn fftshift(x: &[Complex64]) -> Vec<Complex64> {
    let n = x.len();
    let s = n / 2;
    (0..n).map(|j| x[(j + n - s) % n]).collect()
}

/// Inverse of `fftshift`
fn ifftshift(x: &[Complex64]) -> Vec<Complex64> {
    let n = x.len();
    let s = n / 2;
    (0..n).map(|j| x[(j + s) % n]).collect()
}

fn renamed(dim: &str, pattern: &Regex, prefix: &str) -> Option<String> {
    pattern
        .captures(dim)
        .and_then(|c| c.get(1))
        .map(|digits| format!("{}{}", prefix, digits.as_str()))
}

fn check_zero_fill(factor: usize) -> Result<()> {
    if factor == 0 {
        return Err(DnpError::bad_argument("zero_fill_factor must be at least 1"));
    }
    Ok(())
}

/// Forward transform along `dim`
pub fn fourier_transform(data: &NDData, dim: &str, options: &FourierOptions) -> Result<NDData> {
    check_zero_fill(options.zero_fill_factor)?;
    let coord = data.coord(dim)?;
    let dt = spacing(coord, dim)?;
    let n_in = coord.len();
    let n = options.zero_fill_factor * n_in;

    let mut f = Array1::from_shape_fn(n, |k| k as f64 / (n as f64 * dt));
    if options.shift {
        f -= 1.0 / (2.0 * dt);
    }
    let ppm_scale = match (options.convert_to_ppm, data.nmr_frequency()) {
        (true, Some(nmr_frequency)) => {
            f /= nmr_frequency / 1e6;
            true
        }
        (true, None) => {
            log::warn!("No nmr_frequency attribute; frequency axis left in Hz");
            false
        }
        _ => false,
    };

    let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
    let mut out = map_lanes(data, dim, f, |lane| {
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for (b, v) in buffer.iter_mut().zip(lane.iter()) {
            *b = *v;
        }
        fft.process(&mut buffer);
        if options.shift {
            buffer = fftshift(&buffer);
        }
        Ok(Array1::from_vec(buffer))
    })?;

    let new_dim = renamed(dim, &TIME_DIM, "f").unwrap_or_else(|| dim.to_string());
    if new_dim != dim {
        out.rename_in_place(dim, &new_dim)?;
    }
    out.record(
        ProcStep::new("fourier_transform")
            .param("dim", dim)
            .param("zero_fill_factor", options.zero_fill_factor)
            .param("shift", options.shift)
            .param("convert_to_ppm", ppm_scale),
    );
    Ok(out)
}

/// Inverse transform along `dim`
pub fn inverse_fourier_transform(data: &NDData, dim: &str, options: &InverseFourierOptions) -> Result<NDData> {
    check_zero_fill(options.zero_fill_factor)?;
    let mut f = data.coord(dim)?.clone();
    let from_ppm = match (options.convert_from_ppm, data.nmr_frequency()) {
        (true, Some(nmr_frequency)) => {
            f *= nmr_frequency / 1e6;
            true
        }
        (true, None) => {
            log::warn!("No nmr_frequency attribute; frequency axis taken as Hz");
            false
        }
        _ => false,
    };
    let df = spacing(&f, dim)?;
    let n = options.zero_fill_factor * f.len();
    let t = Array1::from_shape_fn(n, |k| k as f64 / (n as f64 * df));

    let ifft = FftPlanner::<f64>::new().plan_fft_inverse(n);
    let mut out = map_lanes(data, dim, t, |lane| {
        let lane: Vec<Complex64> = lane.to_vec();
        let unshifted = if options.shift { ifftshift(&lane) } else { lane };
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for (b, v) in buffer.iter_mut().zip(unshifted) {
            *b = v;
        }
        ifft.process(&mut buffer);
        let scale = 1.0 / n as f64;
        Ok(Array1::from_iter(buffer.into_iter().map(|v| v * scale)))
    })?;

    let new_dim = renamed(dim, &FREQ_DIM, "t").unwrap_or_else(|| dim.to_string());
    if new_dim != dim {
        out.rename_in_place(dim, &new_dim)?;
    }
    out.record(
        ProcStep::new("inverse_fourier_transform")
            .param("dim", dim)
            .param("zero_fill_factor", options.zero_fill_factor)
            .param("shift", options.shift)
            .param("convert_from_ppm", from_ppm),
    );
    Ok(out)
}
