/// Attribute values carried by `NDData`
///
/// Instrument metadata (`attrs`), derived acquisition parameters
/// (`dnplab_attrs`) and processing-step parameters all share this
/// tagged value type. Values are scalars or 1-D arrays.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered string → value mapping
pub type Attrs = IndexMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<f64>),
    StrArray(Vec<String>),
}

impl AttrValue {
    /// Numeric view of the value, parsing strings where possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            AttrValue::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AttrValue::None)
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::None => write!(f, "None"),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(s) => write!(f, "{}", s),
            AttrValue::Array(a) => write!(f, "{:?}", a),
            AttrValue::StrArray(a) => write!(f, "{:?}", a),
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<usize> for AttrValue {
    fn from(v: usize) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::Array(v)
    }
}

impl From<&[f64]> for AttrValue {
    fn from(v: &[f64]) -> Self {
        AttrValue::Array(v.to_vec())
    }
}

impl From<(f64, f64)> for AttrValue {
    fn from(v: (f64, f64)) -> Self {
        AttrValue::Array(vec![v.0, v.1])
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => AttrValue::None,
        }
    }
}

/// Keys whose string values are copied verbatim into `dnplab_attrs`
const VERBATIM_KEYS: [&str; 2] = ["experiment_type", "power_unit"];

/// Derive `dnplab_attrs` from instrument attrs.
///
/// Numeric values are copied, numeric strings are parsed to floats and a
/// few tag-like strings are copied as-is. Everything else is skipped.
pub fn derive_dnplab_attrs(attrs: &Attrs) -> Attrs {
    let mut out = Attrs::new();
    for (key, value) in attrs {
        match value {
            AttrValue::Int(_) | AttrValue::Float(_) | AttrValue::Array(_) => {
                out.insert(key.clone(), value.clone());
            }
            AttrValue::Str(s) if VERBATIM_KEYS.contains(&key.as_str()) => {
                out.insert(key.clone(), AttrValue::Str(s.clone()));
            }
            AttrValue::Str(s) => {
                if let Ok(v) = s.trim().parse::<f64>() {
                    out.insert(key.clone(), AttrValue::Float(v));
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(AttrValue::from(3usize).as_f64(), Some(3.0));
        assert_eq!(AttrValue::from(" 400e6 ").as_f64(), Some(400e6));
        assert_eq!(AttrValue::from("abc").as_f64(), None);
        assert!(AttrValue::from(None::<f64>).is_none());
    }

    #[test]
    fn test_derive_dnplab_attrs() {
        let mut attrs = Attrs::new();
        attrs.insert("nmr_frequency".into(), "14.8e6".into());
        attrs.insert("power".into(), 0.5.into());
        attrs.insert("experiment_type".into(), "nmr_spectrum".into());
        attrs.insert("operator".into(), "someone".into());

        let derived = derive_dnplab_attrs(&attrs);
        assert_eq!(derived["nmr_frequency"], AttrValue::Float(14.8e6));
        assert_eq!(derived["power"], AttrValue::Float(0.5));
        assert_eq!(derived["experiment_type"].as_str(), Some("nmr_spectrum"));
        assert!(!derived.contains_key("operator"));
    }
}
