/// Cross-correlation alignment of spectra
use ndarray::{Array1, Axis, Ix2, Slice};
use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::data::nddata::range_indices;
use crate::data::NDData;
use crate::error::{DnpError, Result};
use crate::log::history::ProcStep;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignOptions {
    /// Reference lineshape; defaults to `|last column|` of the window
    pub reference: Option<Array1<f64>>,
    /// Centre of the correlation window along `dim`
    pub center: Option<f64>,
    /// Full width of the correlation window
    pub width: Option<f64>,
    /// Box-smoothing length applied to the reference
    pub average: Option<usize>,
}

/// Centred moving average, same length as the input
fn box_smooth(x: &Array1<f64>, width: usize) -> Array1<f64> {
    let n = x.len() as isize;
    let w = width as isize;
    let left = (w - 1) / 2;
    Array1::from_shape_fn(x.len(), |i| {
        let start = i as isize - left;
        (start..start + w)
            .filter(|&k| k >= 0 && k < n)
            .map(|k| x[k as usize])
            .sum::<f64>()
            / width as f64
    })
}

/// Lag `L` maximising `Σ col[i + L]·reference[i]`
fn best_lag(col: &[f64], reference: &[f64], planner: &mut FftPlanner<f64>) -> isize {
    let n = col.len();
    let size = 2 * n;
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut a: Vec<Complex64> = (0..size)
        .map(|i| Complex64::new(if i < n { col[i] } else { 0.0 }, 0.0))
        .collect();
    let mut b: Vec<Complex64> = (0..size)
        .map(|i| Complex64::new(if i < n { reference[i] } else { 0.0 }, 0.0))
        .collect();
    fft.process(&mut a);
    fft.process(&mut b);
    let mut corr: Vec<Complex64> = a.iter().zip(&b).map(|(x, y)| x * y.conj()).collect();
    ifft.process(&mut corr);

    let mut best = (0isize, f64::NEG_INFINITY);
    for (k, v) in corr.iter().enumerate() {
        let lag = if k < n { k as isize } else { k as isize - size as isize };
        if v.re > best.1 {
            best = (lag, v.re);
        }
    }
    best.0
}

/// Align every lane along `dim` to a common reference by circular shifts
pub fn ndalign(data: &NDData, dim: &str, options: &AlignOptions) -> Result<NDData> {
    let coord = data.coord(dim)?.clone();
    let (start, stop) = match (options.center, options.width) {
        (Some(c), Some(w)) => range_indices(&coord, c - w / 2.0, c + w / 2.0),
        (None, None) => (0, coord.len() - 1),
        _ => {
            return Err(DnpError::bad_argument(
                "center and width must be given together",
            ))
        }
    };
    let window = Slice::from(start..stop + 1);

    let unfolded = data.unfold(dim)?;
    let values = unfolded.values().view().into_dimensionality::<Ix2>()?;
    let m = values.ncols();
    let abs_window = values.slice_axis(Axis(0), window).mapv(|v| v.norm());

    let mut reference = match &options.reference {
        Some(r) => {
            if r.len() != abs_window.nrows() {
                return Err(DnpError::ShapeMismatch {
                    expected: vec![abs_window.nrows()],
                    got: vec![r.len()],
                });
            }
            r.clone()
        }
        None => abs_window.column(m - 1).to_owned(),
    };
    if let Some(width) = options.average {
        if width == 0 {
            return Err(DnpError::bad_argument("average must be at least 1"));
        }
        reference = box_smooth(&reference, width);
    }
    let reference = reference.to_vec();

    let mut planner = FftPlanner::new();
    let mut aligned = values.to_owned();
    let mut shifts = Vec::with_capacity(m);
    let n = values.nrows() as isize;
    for j in 0..m {
        let col = abs_window.column(j).to_vec();
        let lag = best_lag(&col, &reference, &mut planner);
        shifts.push(lag as f64);
        let source = values.column(j);
        for i in 0..n {
            aligned[[i as usize, j]] = source[(i + lag).rem_euclid(n) as usize];
        }
    }
    log::debug!("ndalign shifts along '{}': {:?}", dim, shifts);

    let mut out = unfolded
        .with_parts(aligned.into_dyn(), unfolded.coords().clone())?
        .fold()?;
    let mut step = ProcStep::new("ndalign").param("dim", dim);
    step = step.param("center", options.center).param("width", options.width);
    step = step.param("average", options.average.map(|a| a as i64));
    out.record(step);
    Ok(out)
}
