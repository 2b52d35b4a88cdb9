/// Labelled n-dimensional array
///
/// `NDData` carries complex values together with named, ordered axes
/// (`Coords`), instrument metadata and the processing history. Every
/// processing operator consumes and returns this type.

use ndarray::{Array1, ArrayD, Axis, IxDyn, Slice};
use num_complex::Complex64;

use super::attrs::{derive_dnplab_attrs, AttrValue, Attrs};
use super::coords::Coords;
use crate::error::{DnpError, Result};
use crate::log::history::{ProcHistory, ProcStep};

/// Name of the collapsed axis produced by `unfold`
pub const UNFOLDED_DIM: &str = "unfolded";

/// What `unfold` needs to remember so that `fold` can undo it
#[derive(Debug, Clone, PartialEq)]
struct FoldInfo {
    /// Original axis position of the unfolded dim
    position: usize,
    rest_dims: Vec<String>,
    rest_coords: Vec<Array1<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NDData {
    values: ArrayD<Complex64>,
    coords: Coords,
    pub attrs: Attrs,
    pub dnplab_attrs: Attrs,
    pub proc_attrs: ProcHistory,
    error: Option<ArrayD<f64>>,
    pub version: String,
    fold_info: Option<FoldInfo>,
}

/// Index selector for one dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Single position, negative counts from the end
    Index(isize),
    /// Nearest coordinate to the value
    Value(f64),
    /// Coordinate range, both ends snapped to the nearest coordinate
    Range(f64, f64),
    /// Raw index slice
    Slice(Slice),
}

impl From<isize> for Selector {
    fn from(i: isize) -> Self {
        Selector::Index(i)
    }
}

impl From<f64> for Selector {
    fn from(v: f64) -> Self {
        Selector::Value(v)
    }
}

impl From<(f64, f64)> for Selector {
    fn from(r: (f64, f64)) -> Self {
        Selector::Range(r.0, r.1)
    }
}

impl From<Slice> for Selector {
    fn from(s: Slice) -> Self {
        Selector::Slice(s)
    }
}

/// Right-hand side of an indexed assignment
#[derive(Debug, Clone)]
pub enum AssignValue {
    Scalar(Complex64),
    Array(ArrayD<Complex64>),
    Data(NDData),
}

impl From<f64> for AssignValue {
    fn from(v: f64) -> Self {
        AssignValue::Scalar(Complex64::new(v, 0.0))
    }
}

impl From<Complex64> for AssignValue {
    fn from(v: Complex64) -> Self {
        AssignValue::Scalar(v)
    }
}

impl From<ArrayD<Complex64>> for AssignValue {
    fn from(v: ArrayD<Complex64>) -> Self {
        AssignValue::Array(v)
    }
}

impl From<&NDData> for AssignValue {
    fn from(v: &NDData) -> Self {
        AssignValue::Data(v.clone())
    }
}

/// Index of the coordinate closest to `value`
pub fn nearest_index(coord: &Array1<f64>, value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &c) in coord.iter().enumerate() {
        let dist = (c - value).abs();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Inclusive index range `[start, stop]` covering the coordinate range
pub fn range_indices(coord: &Array1<f64>, lo: f64, hi: f64) -> (usize, usize) {
    let a = nearest_index(coord, lo);
    let b = nearest_index(coord, hi);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Selector {
    /// Resolve to an index slice along an axis with coordinate `coord`
    pub fn resolve(&self, coord: &Array1<f64>) -> Result<Slice> {
        let n = coord.len() as isize;
        match self {
            Selector::Index(i) => {
                let idx = if *i < 0 { n + i } else { *i };
                if idx < 0 || idx >= n {
                    return Err(DnpError::bad_argument(format!(
                        "index {} out of range for axis of length {}",
                        i, n
                    )));
                }
                Ok(Slice::from(idx..idx + 1))
            }
            Selector::Value(v) => {
                let idx = nearest_index(coord, *v) as isize;
                Ok(Slice::from(idx..idx + 1))
            }
            Selector::Range(lo, hi) => {
                let (start, stop) = range_indices(coord, *lo, *hi);
                Ok(Slice::from(start as isize..stop as isize + 1))
            }
            Selector::Slice(s) => {
                if s.step == 0 {
                    return Err(DnpError::bad_argument("slice step must be non-zero"));
                }
                Ok(*s)
            }
        }
    }
}

/// Return `arr` in standard (row-major) layout, copying only when needed
pub(crate) fn standard<T: Clone>(arr: ArrayD<T>) -> ArrayD<T> {
    if arr.is_standard_layout() {
        arr
    } else {
        arr.as_standard_layout().into_owned()
    }
}

pub(crate) fn reshape<T: Clone>(arr: ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    Ok(standard(arr).into_shape_with_order(IxDyn(shape))?)
}

/// New axis `k` is old axis `perm[k]`
pub(crate) fn permute<T: Clone>(arr: &ArrayD<T>, perm: &[usize]) -> ArrayD<T> {
    arr.view()
        .permuted_axes(perm.to_vec())
        .as_standard_layout()
        .into_owned()
}

fn check_shape(values_shape: &[usize], coords: &Coords) -> Result<()> {
    let expected = coords.shape();
    if values_shape != expected.as_slice() {
        return Err(DnpError::ShapeMismatch {
            expected,
            got: values_shape.to_vec(),
        });
    }
    Ok(())
}

impl NDData {
    pub fn new(values: ArrayD<Complex64>, dims: &[&str], coords: Vec<Array1<f64>>) -> Result<Self> {
        let coords = Coords::from_parts(dims.iter().map(|d| d.to_string()).collect(), coords)?;
        Self::from_coords(values, coords)
    }

    pub fn from_coords(values: ArrayD<Complex64>, coords: Coords) -> Result<Self> {
        check_shape(values.shape(), &coords)?;
        Ok(Self {
            values,
            coords,
            attrs: Attrs::new(),
            dnplab_attrs: Attrs::new(),
            proc_attrs: ProcHistory::new(),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            fold_info: None,
        })
    }

    pub fn from_real(values: ArrayD<f64>, dims: &[&str], coords: Vec<Array1<f64>>) -> Result<Self> {
        Self::new(values.mapv(|v| Complex64::new(v, 0.0)), dims, coords)
    }

    /// One-dimensional real data
    pub fn from_real_1d(dim: &str, coord: Array1<f64>, values: Array1<f64>) -> Result<Self> {
        Self::from_real(values.into_dyn(), &[dim], vec![coord])
    }

    /// One-dimensional complex data
    pub fn from_complex_1d(dim: &str, coord: Array1<f64>, values: Array1<Complex64>) -> Result<Self> {
        Self::new(values.into_dyn(), &[dim], vec![coord])
    }

    /// Copy of `self` with new values and coords, keeping attrs and history
    pub(crate) fn with_parts(&self, values: ArrayD<Complex64>, coords: Coords) -> Result<Self> {
        check_shape(values.shape(), &coords)?;
        Ok(Self {
            values,
            coords,
            attrs: self.attrs.clone(),
            dnplab_attrs: self.dnplab_attrs.clone(),
            proc_attrs: self.proc_attrs.clone(),
            error: None,
            version: self.version.clone(),
            fold_info: self.fold_info.clone(),
        })
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn values(&self) -> &ArrayD<Complex64> {
        &self.values
    }

    /// Mutable view of the values; the shape cannot change through it
    pub fn values_mut(&mut self) -> ndarray::ArrayViewMutD<'_, Complex64> {
        self.values.view_mut()
    }

    pub fn set_values(&mut self, values: ArrayD<Complex64>) -> Result<()> {
        check_shape(values.shape(), &self.coords)?;
        self.values = values;
        Ok(())
    }

    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    pub fn dims(&self) -> Vec<&str> {
        self.coords.dims().iter().map(|d| d.as_str()).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.values.shape().to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.values.ndim()
    }

    pub fn len_of(&self, dim: &str) -> Result<usize> {
        Ok(self.coords.get(dim)?.len())
    }

    pub fn index(&self, dim: &str) -> Result<usize> {
        self.coords.index(dim)
    }

    pub fn coord(&self, dim: &str) -> Result<&Array1<f64>> {
        self.coords.get(dim)
    }

    /// Replace the coordinate of an existing dim; the length must not change
    pub fn set_coord(&mut self, dim: &str, coord: Array1<f64>) -> Result<()> {
        let current = self.coords.get(dim)?.len();
        if coord.len() != current {
            return Err(DnpError::ShapeMismatch {
                expected: vec![current],
                got: vec![coord.len()],
            });
        }
        self.coords.set(dim, coord)
    }

    pub fn error(&self) -> Option<&ArrayD<f64>> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: Option<ArrayD<f64>>) -> Result<()> {
        if let Some(e) = &error {
            check_shape(e.shape(), &self.coords)?;
        }
        self.error = error;
        Ok(())
    }

    pub fn real(&self) -> ArrayD<f64> {
        self.values.mapv(|v| v.re)
    }

    pub fn imag(&self) -> ArrayD<f64> {
        self.values.mapv(|v| v.im)
    }

    pub fn abs(&self) -> ArrayD<f64> {
        self.values.mapv(|v| v.norm())
    }

    pub fn is_complex(&self) -> bool {
        self.values.iter().any(|v| v.im != 0.0)
    }

    /// The single value of a size-1 array (e.g. a fully integrated 1-D dataset)
    pub fn item(&self) -> Result<Complex64> {
        if self.values.len() != 1 {
            return Err(DnpError::bad_argument(format!(
                "item() needs exactly one value, data has shape {:?}",
                self.shape()
            )));
        }
        self.values
            .iter()
            .next()
            .copied()
            .ok_or_else(|| DnpError::bad_argument("empty data"))
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(|v| v.as_f64())
    }

    /// NMR frequency in Hz, if recorded
    pub fn nmr_frequency(&self) -> Option<f64> {
        self.attr_f64("nmr_frequency")
    }

    pub fn update_dnplab_attrs(&mut self) {
        let derived = derive_dnplab_attrs(&self.attrs);
        for (k, v) in derived {
            self.dnplab_attrs.insert(k, v);
        }
    }

    pub fn is_unfolded(&self) -> bool {
        self.fold_info.is_some()
    }

    pub(crate) fn record(&mut self, step: ProcStep) {
        self.proc_attrs.add_entry(step);
    }

    // ─── Reordering ─────────────────────────────────────────────────────────

    pub(crate) fn permute_in_place(&mut self, perm: &[usize]) -> Result<()> {
        self.coords.reorder_by_index(perm)?;
        self.values = permute(&self.values, perm);
        if let Some(e) = &self.error {
            self.error = Some(permute(e, perm));
        }
        Ok(())
    }

    /// Move the named dims to the front; the rest keep their relative order
    pub fn reorder(&self, order: &[&str]) -> Result<Self> {
        let perm = self.coords.order_permutation(order)?;
        let mut out = self.clone();
        out.permute_in_place(&perm)?;
        Ok(out)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<Self> {
        let mut out = self.clone();
        out.coords.rename(old, new)?;
        Ok(out)
    }

    pub(crate) fn rename_in_place(&mut self, old: &str, new: &str) -> Result<()> {
        self.coords.rename(old, new)
    }

    // ─── Fold / unfold ──────────────────────────────────────────────────────

    /// Reshape to 2-D with `dim` first and every other dim collapsed
    pub fn unfold(&self, dim: &str) -> Result<Self> {
        if self.fold_info.is_some() {
            return Err(DnpError::bad_argument("data is already unfolded"));
        }
        let position = self.coords.index(dim)?;
        let perm = self.coords.order_permutation(&[dim])?;

        let mut rest_dims = Vec::new();
        let mut rest_coords = Vec::new();
        for (name, coord) in self.coords.iter() {
            if name != dim {
                rest_dims.push(name.to_string());
                rest_coords.push(coord.clone());
            }
        }

        let n = self.coords.get(dim)?.len();
        let m: usize = rest_coords.iter().map(|c| c.len()).product();

        let values = reshape(permute(&self.values, &perm), &[n, m])?;
        let error = match &self.error {
            Some(e) => Some(reshape(permute(e, &perm), &[n, m])?),
            None => None,
        };

        let mut coords = Coords::new();
        coords.append(dim, self.coords.get(dim)?.clone())?;
        coords.append(UNFOLDED_DIM, Array1::range(0.0, m as f64, 1.0))?;

        let mut out = self.with_parts(values, coords)?;
        out.error = error;
        out.fold_info = Some(FoldInfo {
            position,
            rest_dims,
            rest_coords,
        });
        Ok(out)
    }

    /// Undo `unfold`; the first dim may have changed length or name meanwhile
    pub fn fold(&self) -> Result<Self> {
        let info = self
            .fold_info
            .as_ref()
            .ok_or_else(|| DnpError::bad_argument("data is not unfolded"))?;
        if self.ndim() != 2 {
            return Err(DnpError::bad_argument("unfolded data must be 2-D"));
        }
        let (first_dim, first_coord) = {
            let (name, coord) = self
                .coords
                .iter()
                .next()
                .ok_or_else(|| DnpError::bad_argument("unfolded data has no dims"))?;
            (name.to_string(), coord.clone())
        };
        let n = first_coord.len();
        let mut shape = vec![n];
        shape.extend(info.rest_coords.iter().map(|c| c.len()));
        let m: usize = shape[1..].iter().product();
        if self.values.shape()[1] != m {
            return Err(DnpError::ShapeMismatch {
                expected: vec![n, m],
                got: self.shape(),
            });
        }

        let p = info.position;
        let ndim = shape.len();
        let perm: Vec<usize> = (0..ndim)
            .map(|k| if k < p { k + 1 } else if k == p { 0 } else { k })
            .collect();

        let values = permute(&reshape(self.values.clone(), &shape)?, &perm);
        let error = match &self.error {
            Some(e) => Some(permute(&reshape(e.clone(), &shape)?, &perm)),
            None => None,
        };

        let mut dims: Vec<String> = info.rest_dims.clone();
        let mut coords_list: Vec<Array1<f64>> = info.rest_coords.clone();
        dims.insert(p, first_dim);
        coords_list.insert(p, first_coord);
        let coords = Coords::from_parts(dims, coords_list)?;

        let mut out = self.with_parts(values, coords)?;
        out.error = error;
        out.fold_info = None;
        Ok(out)
    }

    // ─── Indexing ───────────────────────────────────────────────────────────

    fn resolve_selection(&self, selection: &[(&str, Selector)]) -> Result<Vec<Option<Slice>>> {
        let mut slices: Vec<Option<Slice>> = vec![None; self.ndim()];
        for (dim, sel) in selection {
            let axis = self.coords.index(dim)?;
            if slices[axis].is_some() {
                return Err(DnpError::bad_argument(format!(
                    "dimension '{}' selected more than once",
                    dim
                )));
            }
            slices[axis] = Some(sel.resolve(self.coords.get(dim)?)?);
        }
        Ok(slices)
    }

    /// Select a sub-array: `data.select(&[("t2", (0.0, 1.0).into())])`
    pub fn select(&self, selection: &[(&str, Selector)]) -> Result<Self> {
        let slices = self.resolve_selection(selection)?;
        let full = Slice::from(..);
        let pick = |i: usize| slices[i].unwrap_or(full);

        let values = self
            .values
            .slice_each_axis(|ax| pick(ax.axis.index()))
            .to_owned();

        let mut coords = Coords::new();
        for (i, (name, coord)) in self.coords.iter().enumerate() {
            coords.append(name, coord.slice_axis(Axis(0), pick(i)).to_owned())?;
        }

        let mut out = self.with_parts(values, coords)?;
        out.error = self
            .error
            .as_ref()
            .map(|e| e.slice_each_axis(|ax| pick(ax.axis.index())).to_owned());
        Ok(out)
    }

    /// Indexed assignment with the same selector semantics as `select`
    pub fn assign<V: Into<AssignValue>>(&mut self, selection: &[(&str, Selector)], value: V) -> Result<()> {
        let slices = self.resolve_selection(selection)?;
        let full = Slice::from(..);
        let mut view = self
            .values
            .slice_each_axis_mut(|ax| slices[ax.axis.index()].unwrap_or(full));
        let source = match value.into() {
            AssignValue::Scalar(c) => {
                view.fill(c);
                return Ok(());
            }
            AssignValue::Array(a) => a,
            AssignValue::Data(d) => d.values,
        };
        if source.shape() != view.shape() {
            return Err(DnpError::ShapeMismatch {
                expected: view.shape().to_vec(),
                got: source.shape().to_vec(),
            });
        }
        view.assign(&source);
        Ok(())
    }

    // ─── Shape manipulation ─────────────────────────────────────────────────

    /// Drop every dim of length one
    pub fn squeeze(&self) -> Result<Self> {
        let keep: Vec<usize> = (0..self.ndim())
            .filter(|&i| self.values.shape()[i] != 1)
            .collect();
        let shape: Vec<usize> = keep.iter().map(|&i| self.values.shape()[i]).collect();
        let mut coords = Coords::new();
        for &i in &keep {
            coords.append(&self.coords.dims()[i], self.coords[i].clone())?;
        }
        let values = reshape(self.values.clone(), &shape)?;
        let mut out = self.with_parts(values, coords)?;
        if let Some(e) = &self.error {
            out.error = Some(reshape(e.clone(), &shape)?);
        }
        Ok(out)
    }

    /// Append a new length-1 dim with the given coordinate value
    pub fn new_dim(&self, dim: &str, coord_value: f64) -> Result<Self> {
        let mut out = self.clone();
        out.coords.append(dim, Array1::from_elem(1, coord_value))?;
        let axis = Axis(self.ndim());
        out.values = self.values.clone().insert_axis(axis);
        out.error = self.error.clone().map(|e| e.insert_axis(axis));
        Ok(out)
    }

    /// Split `dim` into two dims whose lengths multiply to the original length
    pub fn split(&self, dim: &str, new_dims: [&str; 2], new_coords: [Array1<f64>; 2]) -> Result<Self> {
        let position = self.coords.index(dim)?;
        let n = self.coords.get(dim)?.len();
        let [c0, c1] = new_coords;
        if c0.len() * c1.len() != n {
            return Err(DnpError::ShapeMismatch {
                expected: vec![n],
                got: vec![c0.len(), c1.len()],
            });
        }
        let mut shape = self.shape();
        shape.remove(position);
        shape.insert(position, c1.len());
        shape.insert(position, c0.len());

        let mut coords = self.coords.clone();
        coords.pop(dim)?;
        coords.insert(position, new_dims[0], c0)?;
        coords.insert(position + 1, new_dims[1], c1)?;

        let values = reshape(self.values.clone(), &shape)?;
        let mut out = self.with_parts(values, coords)?;
        if let Some(e) = &self.error {
            out.error = Some(reshape(e.clone(), &shape)?);
        }
        Ok(out)
    }
}

/// Stack datasets of identical shape along a new trailing dim
pub fn concat(items: &[NDData], dim: &str, coord: Array1<f64>) -> Result<NDData> {
    let mut out = stack(items, dim, coord)?;
    out.record(
        ProcStep::new("concat")
            .param("dim", dim)
            .param("count", items.len()),
    );
    Ok(out)
}

/// `concat` without a history entry, for operators that record their own step
pub(crate) fn stack(items: &[NDData], dim: &str, coord: Array1<f64>) -> Result<NDData> {
    let first = items
        .first()
        .ok_or_else(|| DnpError::bad_argument("concat needs at least one dataset"))?;
    if coord.len() != items.len() {
        return Err(DnpError::ShapeMismatch {
            expected: vec![items.len()],
            got: vec![coord.len()],
        });
    }
    for item in &items[1..] {
        if item.dims() != first.dims() {
            return Err(DnpError::CoordMismatch {
                dim: dim.to_string(),
                reason: format!("dims {:?} vs {:?}", item.dims(), first.dims()),
            });
        }
        if item.shape() != first.shape() {
            return Err(DnpError::ShapeMismatch {
                expected: first.shape(),
                got: item.shape(),
            });
        }
    }
    let axis = Axis(first.ndim());
    let views: Vec<_> = items.iter().map(|d| d.values.view()).collect();
    let values = ndarray::stack(axis, &views)?;

    let mut coords = first.coords.clone();
    coords.append(dim, coord)?;

    let mut out = first.with_parts(values, coords)?;
    if items.iter().all(|d| d.error.is_some()) {
        let errs: Vec<_> = items
            .iter()
            .filter_map(|d| d.error.as_ref().map(|e| e.view()))
            .collect();
        out.error = Some(ndarray::stack(axis, &errs)?);
    }
    Ok(out)
}
