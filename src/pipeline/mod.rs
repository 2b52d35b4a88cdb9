/// Processing operators
///
/// Every operator takes `&NDData` and returns a new `NDData` with one
/// step appended to `proc_attrs`; the input is never modified.
pub mod align;
pub mod cpmg;
pub mod fourier;
pub mod integrate;
pub mod phase;
pub mod processing;

use ndarray::{Array1, Array2, ArrayView1, Axis, Ix2};
use num_complex::Complex64;

use crate::data::NDData;
use crate::error::{DnpError, Result};

pub use align::{ndalign, AlignOptions};
pub use cpmg::{cpmg_detect_first_echo, cpmg_integrate, cpmg_show_integration_region, CpmgWindows};
pub use fourier::{fourier_transform, inverse_fourier_transform, FourierOptions, InverseFourierOptions};
pub use integrate::{cumulative_integrate, integrate, Regions};
pub use phase::{autophase, AutophaseOptions, PhaseMethod, PhaseOrder};
pub use processing::{
    apodize, apodize as window, average, calculate_enhancement, convert_power, interp, left_shift,
    phase_cycle, reference, remove_background, remove_offset, signal_to_noise, PowerConversion,
    WindowOptions,
};

/// Replace every 1-D lane along `dim` by `f(lane)`.
///
/// The lanes of the result have the length of `new_coord`, which becomes
/// the coordinate of `dim`. All other dims, attrs and history are kept;
/// the error array is dropped.
pub(crate) fn map_lanes<F>(data: &NDData, dim: &str, new_coord: Array1<f64>, mut f: F) -> Result<NDData>
where
    F: FnMut(ArrayView1<'_, Complex64>) -> Result<Array1<Complex64>>,
{
    let unfolded = data.unfold(dim)?;
    let view = unfolded.values().view().into_dimensionality::<Ix2>()?;
    let n = new_coord.len();
    let mut out = Array2::<Complex64>::zeros((n, view.ncols()));

    for (j, lane) in view.axis_iter(Axis(1)).enumerate() {
        let column = f(lane)?;
        if column.len() != n {
            return Err(DnpError::ShapeMismatch {
                expected: vec![n],
                got: vec![column.len()],
            });
        }
        out.column_mut(j).assign(&column);
    }

    let mut coords = unfolded.coords().clone();
    coords.set(dim, new_coord)?;
    unfolded.with_parts(out.into_dyn(), coords)?.fold()
}

/// Uniform sample spacing of a coordinate
pub(crate) fn spacing(coord: &Array1<f64>, dim: &str) -> Result<f64> {
    if coord.len() < 2 {
        return Err(DnpError::bad_argument(format!(
            "dimension '{}' needs at least two points",
            dim
        )));
    }
    Ok(coord[1] - coord[0])
}
