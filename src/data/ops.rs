/// Arithmetic on `NDData`
///
/// Binary operations between two datasets first `align` them: the dim
/// lists are unioned (left order first), both operands are broadcast to
/// the union and shared dims must carry the same coordinates. Attributes
/// merge with the left operand winning.

use std::ops::{Add, Div, Mul, Neg, Sub};

use ndarray::{ArrayD, IxDyn, Zip};
use num_complex::Complex64;

use super::attrs::Attrs;
use super::coords::Coords;
use super::nddata::{permute, NDData};
use crate::error::{DnpError, Result};

const COORD_RTOL: f64 = 1e-5;
const COORD_ATOL: f64 = 1e-8;

fn coords_close(a: &ndarray::Array1<f64>, b: &ndarray::Array1<f64>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= COORD_ATOL + COORD_RTOL * y.abs())
}

/// Broadcast `arr` (axes named `dims`) to the axis order and shape of `union`
fn expand_to<T: Clone>(arr: &ArrayD<T>, dims: &[&str], union: &Coords) -> Result<ArrayD<T>> {
    // Axes of `arr` in the order they appear in the union
    let mut perm: Vec<usize> = Vec::with_capacity(dims.len());
    for name in union.dims() {
        if let Some(i) = dims.iter().position(|d| d == name) {
            perm.push(i);
        }
    }
    let mut out = permute(arr, &perm);
    for (axis, name) in union.dims().iter().enumerate() {
        if !dims.contains(&name.as_str()) {
            out = out.insert_axis(ndarray::Axis(axis));
        }
    }
    let shape = union.shape();
    let view = out.broadcast(IxDyn(&shape)).ok_or_else(|| DnpError::ShapeMismatch {
        expected: shape.clone(),
        got: out.shape().to_vec(),
    })?;
    Ok(view.to_owned())
}

/// Merge attrs, left wins; differing values are reported
pub(crate) fn merge_attrs(left: &Attrs, right: &Attrs) -> Attrs {
    let mut out = left.clone();
    for (k, v) in right {
        match out.get(k) {
            Some(existing) if existing != v => {
                log::warn!(
                    "attribute '{}' differs between operands ({} vs {}); keeping left value",
                    k,
                    existing,
                    v
                );
            }
            Some(_) => {}
            None => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

/// Broadcast two datasets onto the union of their dims.
///
/// Both results have identical dims, coords and shape. Shared dims must
/// have matching coordinates, otherwise `CoordMismatch` is returned.
pub fn align(a: &NDData, b: &NDData) -> Result<(NDData, NDData)> {
    let mut union = a.coords().clone();
    for (name, coord) in b.coords().iter() {
        match a.coords().get(name) {
            Ok(existing) => {
                if !coords_close(existing, coord) {
                    return Err(DnpError::CoordMismatch {
                        dim: name.to_string(),
                        reason: format!(
                            "lengths {} and {} or values differ",
                            existing.len(),
                            coord.len()
                        ),
                    });
                }
            }
            Err(_) => union.append(name, coord.clone())?,
        }
    }

    let attrs = merge_attrs(&a.attrs, &b.attrs);

    let build = |d: &NDData, attrs: Attrs| -> Result<NDData> {
        let dims = d.dims();
        let values = expand_to(d.values(), &dims, &union)?;
        let mut out = d.with_parts(values, union.clone())?;
        if let Some(e) = d.error() {
            out.set_error(Some(expand_to(e, &dims, &union)?))?;
        }
        out.attrs = attrs;
        Ok(out)
    };

    let left = build(a, attrs)?;
    let right = build(b, b.attrs.clone())?;
    Ok((left, right))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn apply(self, x: Complex64, y: Complex64) -> Complex64 {
        match self {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
        }
    }
}

fn propagate_error(
    op: BinOp,
    a: &ArrayD<Complex64>,
    ea: Option<&ArrayD<f64>>,
    b: &ArrayD<Complex64>,
    eb: Option<&ArrayD<f64>>,
) -> Option<ArrayD<f64>> {
    match (ea, eb) {
        (Some(ea), Some(eb)) => {
            let mut out = ArrayD::<f64>::zeros(a.raw_dim());
            match op {
                BinOp::Add | BinOp::Sub => {
                    Zip::from(&mut out).and(ea).and(eb).for_each(|o, &x, &y| {
                        *o = (x * x + y * y).sqrt();
                    });
                }
                BinOp::Mul | BinOp::Div => {
                    // Relative errors in quadrature, scaled by |a|
                    Zip::from(&mut out)
                        .and(a)
                        .and(ea)
                        .and(b)
                        .and(eb)
                        .for_each(|o, va, &xa, vb, &xb| {
                            let ra = xa / va.norm();
                            let rb = xb / vb.norm();
                            *o = va.norm() * (ra * ra + rb * rb).sqrt();
                        });
                }
            }
            Some(out)
        }
        (Some(e), None) | (None, Some(e)) => Some(e.clone()),
        (None, None) => None,
    }
}

fn binary(a: &NDData, b: &NDData, op: BinOp) -> Result<NDData> {
    let (left, right) = align(a, b)?;
    let mut values = left.values().clone();
    Zip::from(&mut values)
        .and(right.values())
        .for_each(|x, &y| *x = op.apply(*x, y));
    let error = propagate_error(op, left.values(), left.error(), right.values(), right.error());
    let mut out = left.with_parts(values, left.coords().clone())?;
    out.set_error(error)?;
    Ok(out)
}

impl NDData {
    pub fn try_add(&self, other: &NDData) -> Result<NDData> {
        binary(self, other, BinOp::Add)
    }

    pub fn try_sub(&self, other: &NDData) -> Result<NDData> {
        binary(self, other, BinOp::Sub)
    }

    pub fn try_mul(&self, other: &NDData) -> Result<NDData> {
        binary(self, other, BinOp::Mul)
    }

    pub fn try_div(&self, other: &NDData) -> Result<NDData> {
        binary(self, other, BinOp::Div)
    }

    fn scalar_op(&self, c: Complex64, op: BinOp) -> NDData {
        let mut out = self.clone();
        out.values_mut().mapv_inplace(|x| op.apply(x, c));
        if let Some(e) = self.error() {
            let scaled = match op {
                BinOp::Add | BinOp::Sub => e.clone(),
                BinOp::Mul => e.mapv(|v| v * c.norm()),
                BinOp::Div => e.mapv(|v| v / c.norm()),
            };
            // Same shape as before; cannot fail
            let _ = out.set_error(Some(scaled));
        }
        out
    }
}

macro_rules! impl_scalar_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<f64> for &NDData {
            type Output = NDData;
            fn $method(self, rhs: f64) -> NDData {
                self.scalar_op(Complex64::new(rhs, 0.0), $op)
            }
        }

        impl $trait<f64> for NDData {
            type Output = NDData;
            fn $method(self, rhs: f64) -> NDData {
                self.scalar_op(Complex64::new(rhs, 0.0), $op)
            }
        }

        impl $trait<Complex64> for &NDData {
            type Output = NDData;
            fn $method(self, rhs: Complex64) -> NDData {
                self.scalar_op(rhs, $op)
            }
        }

        impl $trait<Complex64> for NDData {
            type Output = NDData;
            fn $method(self, rhs: Complex64) -> NDData {
                self.scalar_op(rhs, $op)
            }
        }
    };
}

impl_scalar_op!(Add, add, BinOp::Add);
impl_scalar_op!(Sub, sub, BinOp::Sub);
impl_scalar_op!(Mul, mul, BinOp::Mul);
impl_scalar_op!(Div, div, BinOp::Div);

impl Neg for &NDData {
    type Output = NDData;
    fn neg(self) -> NDData {
        self.scalar_op(Complex64::new(-1.0, 0.0), BinOp::Mul)
    }
}

impl Neg for NDData {
    type Output = NDData;
    fn neg(self) -> NDData {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn ramp() -> NDData {
        NDData::from_real_1d("t2", array![0.0, 1.0, 2.0], array![1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_scalar_arithmetic() {
        let x = ramp();
        let a = &(&x + 1.0) + 1.0;
        let b = &x + 2.0;
        assert_eq!(a, b);

        let zero = &x * 0.0;
        assert!(zero.values().iter().all(|v| v.norm() == 0.0));
        assert_eq!(zero.coords(), x.coords());

        let neg = -&x;
        assert_eq!(neg.values()[[1]].re, -2.0);
    }

    #[test]
    fn test_broadcast_union() {
        let x = ramp();
        let y = NDData::from_real_1d("power", array![0.0, 0.5], array![10.0, 20.0]).unwrap();
        let sum = x.try_add(&y).unwrap();
        assert_eq!(sum.dims(), vec!["t2", "power"]);
        assert_eq!(sum.shape(), vec![3, 2]);
        assert_eq!(sum.values()[[2, 1]].re, 23.0);

        // Right operand with dims in a different order
        let z = NDData::from_real(
            Array2::from_elem((2, 3), 1.0).into_dyn(),
            &["power", "t2"],
            vec![array![0.0, 0.5], array![0.0, 1.0, 2.0]],
        )
        .unwrap();
        let prod = sum.try_mul(&z).unwrap();
        assert_eq!(prod.dims(), vec!["t2", "power"]);
        assert_eq!(prod.values()[[0, 1]].re, 21.0);
    }

    #[test]
    fn test_coord_mismatch() {
        let x = ramp();
        let y = NDData::from_real_1d("t2", array![0.0, 1.0, 2.5], array![1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(x.try_add(&y), Err(DnpError::CoordMismatch { .. })));
    }

    #[test]
    fn test_align_idempotent() {
        let x = ramp();
        let y = NDData::from_real_1d("power", array![0.0, 0.5], array![10.0, 20.0]).unwrap();
        let (a, b) = align(&x, &y).unwrap();
        let (a2, b2) = align(&a, &b).unwrap();
        assert_eq!(a, a2);
        assert_eq!(b, b2);
    }

    #[test]
    fn test_attr_merge_left_wins() {
        let mut x = ramp();
        let mut y = ramp();
        x.attrs.insert("power".into(), 1.0.into());
        y.attrs.insert("power".into(), 2.0.into());
        y.attrs.insert("temperature".into(), 298.0.into());
        let sum = x.try_add(&y).unwrap();
        assert_eq!(sum.attr_f64("power"), Some(1.0));
        assert_eq!(sum.attr_f64("temperature"), Some(298.0));
    }

    #[test]
    fn test_error_propagation() {
        let mut x = ramp();
        let mut y = ramp();
        x.set_error(Some(array![3.0, 3.0, 3.0].into_dyn())).unwrap();
        y.set_error(Some(array![4.0, 4.0, 4.0].into_dyn())).unwrap();

        let sum = x.try_add(&y).unwrap();
        assert_abs_diff_eq!(sum.error().unwrap()[[0]], 5.0, epsilon = 1e-12);

        let prod = x.try_mul(&y).unwrap();
        // |a| * sqrt((3/|a|)^2 + (4/|b|)^2) with a = b = 2
        assert_abs_diff_eq!(prod.error().unwrap()[[1]], 5.0, epsilon = 1e-12);

        let scaled = &x * 2.0;
        assert_abs_diff_eq!(scaled.error().unwrap()[[2]], 6.0, epsilon = 1e-12);
    }
}
