/// Workspace persistence
///
/// A workspace is a JSON document mapping names to items. Every item is an
/// object tagged with `dnplab_data_type`:
/// - `"dnpdata"`: values (`real`/`imag` arrays in row-major order), ordered
///   `dims`, one coordinate array per dim, `attrs`, `dnplab_attrs`,
///   `proc_attrs` keyed `"<index>:<step>"`, an optional `error` array and
///   the `dnplab_version` that wrote it
/// - `"dict"`: a flat `attrs` mapping, e.g. hydration results
///
/// A document holding a single `__DNPDATA__` item loads as bare data.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, IxDyn};
use num_complex::Complex64;
use serde_json::{Map, Number, Value};

use crate::analysis::HydrationResults;
use crate::data::{AttrValue, Attrs, NDData};
use crate::error::{DnpError, Result};
use crate::log::history::{ProcHistory, ProcStep};

/// Key of the only item in a single-dataset file
pub const DNPDATA_KEY: &str = "__DNPDATA__";
/// Stand-in for absent values
pub const NONE_SENTINEL: &str = "__PYTHON_NONE__";

const DATA_TYPE_KEY: &str = "dnplab_data_type";
const KIND_DATA: &str = "dnpdata";
const KIND_DICT: &str = "dict";

#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceItem {
    Data(NDData),
    Dict(Attrs),
}

impl From<NDData> for WorkspaceItem {
    fn from(data: NDData) -> Self {
        WorkspaceItem::Data(data)
    }
}

impl From<Attrs> for WorkspaceItem {
    fn from(attrs: Attrs) -> Self {
        WorkspaceItem::Dict(attrs)
    }
}

impl From<&HydrationResults> for WorkspaceItem {
    fn from(results: &HydrationResults) -> Self {
        WorkspaceItem::Dict(results.to_attrs())
    }
}

/// Named items in insertion order
pub type Workspace = IndexMap<String, WorkspaceItem>;

/// What a file turned out to contain
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Data(NDData),
    Workspace(Workspace),
}

impl Loaded {
    pub fn into_data(self) -> Option<NDData> {
        match self {
            Loaded::Data(d) => Some(d),
            Loaded::Workspace(_) => None,
        }
    }

    pub fn into_workspace(self) -> Workspace {
        match self {
            Loaded::Data(d) => {
                let mut ws = Workspace::new();
                ws.insert(DNPDATA_KEY.to_string(), WorkspaceItem::Data(d));
                ws
            }
            Loaded::Workspace(ws) => ws,
        }
    }
}

// ─── Scalars and attributes ────────────────────────────────────────────────

fn format_error<S: Into<String>>(msg: S) -> DnpError {
    DnpError::DataFormat(msg.into())
}

/// Finite floats are JSON numbers; NaN and infinities become string tokens
fn encode_f64(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

fn special_float(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn decode_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format_error(format!("number {} out of range", n))),
        Value::String(s) => special_float(s).ok_or_else(|| format_error(format!("expected a number, got '{}'", s))),
        other => Err(format_error(format!("expected a number, got {}", other))),
    }
}

fn encode_floats(values: impl IntoIterator<Item = f64>) -> Value {
    Value::Array(values.into_iter().map(encode_f64).collect())
}

fn decode_floats(v: &Value) -> Result<Vec<f64>> {
    v.as_array()
        .ok_or_else(|| format_error("expected an array of numbers"))?
        .iter()
        .map(decode_f64)
        .collect()
}

fn encode_attr(value: &AttrValue) -> Value {
    match value {
        AttrValue::None => Value::String(NONE_SENTINEL.into()),
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Int(i) => Value::Number((*i).into()),
        AttrValue::Float(f) => encode_f64(*f),
        AttrValue::Str(s) => Value::String(s.clone()),
        AttrValue::Array(a) => encode_floats(a.iter().copied()),
        AttrValue::StrArray(a) => Value::Array(a.iter().cloned().map(Value::String).collect()),
    }
}

fn decode_attr(value: &Value) -> Result<AttrValue> {
    Ok(match value {
        Value::Null => AttrValue::None,
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttrValue::Int(i),
            None => AttrValue::Float(decode_f64(value)?),
        },
        Value::String(s) if s == NONE_SENTINEL => AttrValue::None,
        Value::String(s) => match special_float(s) {
            Some(f) => AttrValue::Float(f),
            None => AttrValue::Str(s.clone()),
        },
        Value::Array(items) => {
            let textual = items
                .iter()
                .any(|v| matches!(v, Value::String(s) if special_float(s).is_none()));
            if textual {
                let strings = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| format_error("array mixes strings and numbers"))?;
                AttrValue::StrArray(strings)
            } else {
                AttrValue::Array(decode_floats(value)?)
            }
        }
        Value::Object(_) => return Err(format_error("nested objects are not valid attribute values")),
    })
}

fn encode_attrs(attrs: &Attrs) -> Value {
    Value::Object(attrs.iter().map(|(k, v)| (k.clone(), encode_attr(v))).collect())
}

fn decode_attrs(value: Option<&Value>) -> Result<Attrs> {
    match value {
        None | Some(Value::Null) => Ok(Attrs::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| decode_attr(v).map(|a| (k.clone(), a)))
            .collect(),
        Some(_) => Err(format_error("attributes must be an object")),
    }
}

fn encode_history(history: &ProcHistory) -> Value {
    Value::Object(
        history
            .iter()
            .enumerate()
            .map(|(i, step)| (format!("{}:{}", i, step.name), encode_attrs(&step.params)))
            .collect(),
    )
}

fn decode_history(value: Option<&Value>) -> Result<ProcHistory> {
    let map = match value {
        None | Some(Value::Null) => return Ok(ProcHistory::new()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(format_error("proc_attrs must be an object")),
    };
    let mut steps = Vec::with_capacity(map.len());
    for (key, params) in map {
        let (index, name) = key
            .split_once(':')
            .ok_or_else(|| format_error(format!("proc_attrs key '{}' is not '<index>:<step>'", key)))?;
        let index: usize = index
            .parse()
            .map_err(|_| format_error(format!("proc_attrs key '{}' has no numeric index", key)))?;
        steps.push((
            index,
            ProcStep {
                name: name.to_string(),
                params: decode_attrs(Some(params))?,
            },
        ));
    }
    steps.sort_by_key(|(i, _)| *i);
    // Entries are restored without re-logging them
    Ok(ProcHistory {
        entries: steps.into_iter().map(|(_, s)| s).collect(),
    })
}

// ─── Items ─────────────────────────────────────────────────────────────────

fn encode_data(data: &NDData) -> Value {
    let mut obj = Map::new();
    obj.insert(DATA_TYPE_KEY.into(), Value::String(KIND_DATA.into()));
    obj.insert("dnplab_version".into(), Value::String(data.version.clone()));

    let mut values = Map::new();
    values.insert("real".into(), encode_floats(data.values().iter().map(|v| v.re)));
    values.insert("imag".into(), encode_floats(data.values().iter().map(|v| v.im)));
    obj.insert("values".into(), Value::Object(values));

    obj.insert(
        "dims".into(),
        Value::Array(data.dims().into_iter().map(|d| Value::String(d.into())).collect()),
    );
    let coords: Map<String, Value> = data
        .coords()
        .iter()
        .map(|(dim, coord)| (dim.to_string(), encode_floats(coord.iter().copied())))
        .collect();
    obj.insert("coords".into(), Value::Object(coords));

    obj.insert("attrs".into(), encode_attrs(&data.attrs));
    obj.insert("dnplab_attrs".into(), encode_attrs(&data.dnplab_attrs));
    obj.insert("proc_attrs".into(), encode_history(&data.proc_attrs));
    if let Some(error) = data.error() {
        obj.insert("error".into(), encode_floats(error.iter().copied()));
    }
    Value::Object(obj)
}

fn decode_data(obj: &Map<String, Value>) -> Result<NDData> {
    let dims: Vec<String> = obj
        .get("dims")
        .and_then(Value::as_array)
        .ok_or_else(|| format_error("dnpdata item has no dims"))?
        .iter()
        .map(|d| {
            d.as_str()
                .map(str::to_string)
                .ok_or_else(|| format_error("dim names must be strings"))
        })
        .collect::<Result<_>>()?;

    let coord_map = obj
        .get("coords")
        .and_then(Value::as_object)
        .ok_or_else(|| format_error("dnpdata item has no coords"))?;
    let coords = dims
        .iter()
        .map(|d| {
            let c = coord_map
                .get(d)
                .ok_or_else(|| format_error(format!("no coordinate for dim '{}'", d)))?;
            Ok(Array1::from(decode_floats(c)?))
        })
        .collect::<Result<Vec<_>>>()?;
    let shape: Vec<usize> = coords.iter().map(Array1::len).collect();

    let values = obj
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| format_error("dnpdata item has no values"))?;
    let real = decode_floats(values.get("real").ok_or_else(|| format_error("values have no real part"))?)?;
    let imag = match values.get("imag") {
        Some(v) => decode_floats(v)?,
        None => vec![0.0; real.len()],
    };
    if imag.len() != real.len() {
        return Err(format_error("real and imaginary parts differ in length"));
    }
    let complex: Vec<Complex64> = real.into_iter().zip(imag).map(|(re, im)| Complex64::new(re, im)).collect();
    let values = ArrayD::from_shape_vec(IxDyn(&shape), complex)
        .map_err(|e| format_error(format!("values do not match coords: {}", e)))?;

    let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();
    let mut data = NDData::new(values, &dim_refs, coords)?;
    data.attrs = decode_attrs(obj.get("attrs"))?;
    data.dnplab_attrs = decode_attrs(obj.get("dnplab_attrs"))?;
    data.proc_attrs = decode_history(obj.get("proc_attrs"))?;
    if let Some(version) = obj.get("dnplab_version").and_then(Value::as_str) {
        data.version = version.to_string();
    }
    if let Some(error) = obj.get("error") {
        let error = ArrayD::from_shape_vec(IxDyn(&shape), decode_floats(error)?)
            .map_err(|e| format_error(format!("error does not match coords: {}", e)))?;
        data.set_error(Some(error))?;
    }
    Ok(data)
}

fn encode_item(item: &WorkspaceItem) -> Value {
    match item {
        WorkspaceItem::Data(data) => encode_data(data),
        WorkspaceItem::Dict(attrs) => {
            let mut obj = Map::new();
            obj.insert(DATA_TYPE_KEY.into(), Value::String(KIND_DICT.into()));
            obj.insert("attrs".into(), encode_attrs(attrs));
            Value::Object(obj)
        }
    }
}

fn decode_item(name: &str, value: &Value) -> Result<WorkspaceItem> {
    let obj = value
        .as_object()
        .ok_or_else(|| format_error(format!("item '{}' is not an object", name)))?;
    match obj.get(DATA_TYPE_KEY).and_then(Value::as_str) {
        Some(KIND_DATA) => Ok(WorkspaceItem::Data(decode_data(obj)?)),
        Some(KIND_DICT) => Ok(WorkspaceItem::Dict(decode_attrs(obj.get("attrs"))?)),
        Some(other) => Err(format_error(format!("item '{}' has unknown type '{}'", name, other))),
        None => Err(format_error(format!("item '{}' has no {}", name, DATA_TYPE_KEY))),
    }
}

// ─── Documents and files ───────────────────────────────────────────────────

pub fn workspace_to_value(workspace: &Workspace) -> Value {
    Value::Object(
        workspace
            .iter()
            .map(|(name, item)| (name.clone(), encode_item(item)))
            .collect(),
    )
}

/// Decode a document; a lone `__DNPDATA__` item comes back as bare data
pub fn value_to_loaded(value: &Value) -> Result<Loaded> {
    let map = value
        .as_object()
        .ok_or_else(|| format_error("workspace document must be an object"))?;
    let mut workspace = Workspace::new();
    for (name, item) in map {
        workspace.insert(name.clone(), decode_item(name, item)?);
    }
    if workspace.len() == 1 {
        if let Some(WorkspaceItem::Data(_)) = workspace.get(DNPDATA_KEY) {
            if let Some((_, WorkspaceItem::Data(data))) = workspace.pop() {
                return Ok(Loaded::Data(data));
            }
        }
    }
    Ok(Loaded::Workspace(workspace))
}

/// Write a workspace to `path`
pub fn save<P: AsRef<Path>>(path: P, workspace: &Workspace) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &workspace_to_value(workspace))?;
    writer.flush()?;
    log::info!("Saved {} item(s) to {}", workspace.len(), path.display());
    Ok(())
}

/// Write a single dataset under `__DNPDATA__`
pub fn save_data<P: AsRef<Path>>(path: P, data: &NDData) -> Result<()> {
    let mut workspace = Workspace::new();
    workspace.insert(DNPDATA_KEY.to_string(), WorkspaceItem::Data(data.clone()));
    save(path, &workspace)
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<Loaded> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let value: Value = serde_json::from_reader(reader)?;
    let loaded = value_to_loaded(&value)?;
    log::debug!("Loaded workspace {}", path.display());
    Ok(loaded)
}
