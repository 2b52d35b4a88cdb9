/// Ordered collection of named 1-D coordinate arrays
///
/// Each dimension of an `NDData` has exactly one entry here; the order of
/// the entries is the axis order of the values.

use ndarray::Array1;

use crate::error::{DnpError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coords {
    dims: Vec<String>,
    coords: Vec<Array1<f64>>,
}

impl Coords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel lists of names and arrays
    pub fn from_parts(dims: Vec<String>, coords: Vec<Array1<f64>>) -> Result<Self> {
        if dims.len() != coords.len() {
            return Err(DnpError::bad_argument(format!(
                "{} dims given with {} coordinate arrays",
                dims.len(),
                coords.len()
            )));
        }
        let mut out = Self::new();
        for (dim, coord) in dims.into_iter().zip(coords) {
            out.append(&dim, coord)?;
        }
        Ok(out)
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Per-axis lengths
    pub fn shape(&self) -> Vec<usize> {
        self.coords.iter().map(|c| c.len()).collect()
    }

    pub fn contains(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| d == dim)
    }

    /// Axis position of `dim`
    pub fn index(&self, dim: &str) -> Result<usize> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| DnpError::UnknownDim(dim.to_string()))
    }

    pub fn get(&self, dim: &str) -> Result<&Array1<f64>> {
        let i = self.index(dim)?;
        Ok(&self.coords[i])
    }

    pub fn get_mut(&mut self, dim: &str) -> Result<&mut Array1<f64>> {
        let i = self.index(dim)?;
        Ok(&mut self.coords[i])
    }

    pub fn get_index(&self, index: usize) -> Result<&Array1<f64>> {
        self.coords
            .get(index)
            .ok_or_else(|| DnpError::UnknownDim(format!("#{}", index)))
    }

    /// Replace the coordinate of `dim` if present, otherwise append it
    pub fn set(&mut self, dim: &str, coord: Array1<f64>) -> Result<()> {
        check_coord(dim, &coord)?;
        match self.dims.iter().position(|d| d == dim) {
            Some(i) => self.coords[i] = coord,
            None => {
                self.dims.push(dim.to_string());
                self.coords.push(coord);
            }
        }
        Ok(())
    }

    pub fn append(&mut self, dim: &str, coord: Array1<f64>) -> Result<()> {
        if self.contains(dim) {
            return Err(DnpError::DuplicateDim(dim.to_string()));
        }
        check_coord(dim, &coord)?;
        self.dims.push(dim.to_string());
        self.coords.push(coord);
        Ok(())
    }

    /// Insert a dimension at axis position `index`
    pub fn insert(&mut self, index: usize, dim: &str, coord: Array1<f64>) -> Result<()> {
        if self.contains(dim) {
            return Err(DnpError::DuplicateDim(dim.to_string()));
        }
        check_coord(dim, &coord)?;
        let index = index.min(self.dims.len());
        self.dims.insert(index, dim.to_string());
        self.coords.insert(index, coord);
        Ok(())
    }

    pub fn pop(&mut self, dim: &str) -> Result<Array1<f64>> {
        let i = self.index(dim)?;
        self.dims.remove(i);
        Ok(self.coords.remove(i))
    }

    pub fn pop_index(&mut self, index: usize) -> Result<(String, Array1<f64>)> {
        if index >= self.dims.len() {
            return Err(DnpError::UnknownDim(format!("#{}", index)));
        }
        Ok((self.dims.remove(index), self.coords.remove(index)))
    }

    /// Permutation that moves the dims named in `new_order` to the front.
    ///
    /// Dims not named keep their original relative order after them.
    pub fn order_permutation(&self, new_order: &[&str]) -> Result<Vec<usize>> {
        let mut perm = Vec::with_capacity(self.dims.len());
        for dim in new_order {
            let i = self.index(dim)?;
            if perm.contains(&i) {
                return Err(DnpError::DuplicateDim(dim.to_string()));
            }
            perm.push(i);
        }
        for i in 0..self.dims.len() {
            if !perm.contains(&i) {
                perm.push(i);
            }
        }
        Ok(perm)
    }

    pub fn reorder(&mut self, new_order: &[&str]) -> Result<Vec<usize>> {
        let perm = self.order_permutation(new_order)?;
        self.reorder_by_index(&perm)?;
        Ok(perm)
    }

    /// Reorder so that new axis `k` is old axis `permutation[k]`
    pub fn reorder_by_index(&mut self, permutation: &[usize]) -> Result<()> {
        let n = self.dims.len();
        let mut seen = vec![false; n];
        if permutation.len() != n {
            return Err(DnpError::bad_argument(format!(
                "permutation of length {} for {} dims",
                permutation.len(),
                n
            )));
        }
        for &p in permutation {
            if p >= n || seen[p] {
                return Err(DnpError::bad_argument(format!(
                    "invalid permutation {:?}",
                    permutation
                )));
            }
            seen[p] = true;
        }
        self.dims = permutation.iter().map(|&p| self.dims[p].clone()).collect();
        self.coords = permutation.iter().map(|&p| self.coords[p].clone()).collect();
        Ok(())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return self.index(old).map(|_| ());
        }
        if self.contains(new) {
            return Err(DnpError::DuplicateDim(new.to_string()));
        }
        let i = self.index(old)?;
        self.dims[i] = new.to_string();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array1<f64>)> {
        self.dims.iter().map(|d| d.as_str()).zip(self.coords.iter())
    }
}

impl std::ops::Index<&str> for Coords {
    type Output = Array1<f64>;

    fn index(&self, dim: &str) -> &Array1<f64> {
        match self.get(dim) {
            Ok(c) => c,
            Err(_) => panic!("unknown dimension '{}'", dim),
        }
    }
}

impl std::ops::Index<usize> for Coords {
    type Output = Array1<f64>;

    fn index(&self, index: usize) -> &Array1<f64> {
        &self.coords[index]
    }
}

fn check_coord(dim: &str, coord: &Array1<f64>) -> Result<()> {
    if dim.is_empty() {
        return Err(DnpError::bad_argument("dimension names must be non-empty"));
    }
    if coord.is_empty() {
        return Err(DnpError::bad_argument(format!(
            "coordinate of '{}' must have at least one element",
            dim
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Coords {
        Coords::from_parts(
            vec!["t2".into(), "power".into(), "Average".into()],
            vec![array![0.0, 1.0, 2.0], array![0.1, 0.2], array![1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_and_index() {
        let c = sample();
        assert_eq!(c.shape(), vec![3, 2, 1]);
        assert_eq!(c.index("power").unwrap(), 1);
        assert!(matches!(c.index("f2"), Err(DnpError::UnknownDim(_))));
        assert_eq!(c["power"][1], 0.2);
        assert_eq!(c[0][2], 2.0);
    }

    #[test]
    fn test_append_duplicate_fails() {
        let mut c = sample();
        assert!(matches!(
            c.append("t2", array![1.0]),
            Err(DnpError::DuplicateDim(_))
        ));
        assert!(c.append("", array![1.0]).is_err());
        assert!(c.append("x", Array1::zeros(0)).is_err());
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut c = sample();
        c.set("t2", array![5.0, 6.0]).unwrap();
        assert_eq!(c.shape(), vec![2, 2, 1]);
        c.set("new", array![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(c.dims().last().unwrap(), "new");
    }

    #[test]
    fn test_partial_reorder() {
        let mut c = sample();
        let perm = c.reorder(&["Average"]).unwrap();
        assert_eq!(perm, vec![2, 0, 1]);
        assert_eq!(c.dims(), &["Average", "t2", "power"]);
        assert!(c.reorder(&["missing"]).is_err());
    }

    #[test]
    fn test_pop_and_rename() {
        let mut c = sample();
        let p = c.pop("power").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(c.dims(), &["t2", "Average"]);
        c.rename("t2", "f2").unwrap();
        assert!(c.contains("f2"));
        assert!(c.rename("f2", "Average").is_err());
        let (name, _) = c.pop_index(1).unwrap();
        assert_eq!(name, "Average");
    }
}
