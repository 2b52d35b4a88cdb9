/// Processing history (`proc_attrs`)
///
/// Every processing call records itself as one step:
/// - the step name (the operator that ran)
/// - the parameter values it ran with, in call order
///
/// The history travels with the data, is copied with it and can be
/// exported as human-readable text or JSON.

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::data::attrs::{AttrValue, Attrs};

/// A single processing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcStep {
    pub name: String,
    pub params: Attrs,
}

impl ProcStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Attrs::new(),
        }
    }

    /// Builder-style parameter insertion
    pub fn param<V: Into<AttrValue>>(mut self, key: &str, value: V) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.params.get(key)
    }

    /// One-line summary, e.g. `fourier_transform(dim=t2, zero_fill_factor=2)`
    pub fn summary(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Ordered, append-only list of processing steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcHistory {
    pub entries: Vec<ProcStep>,
}

impl ProcHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn add_entry(&mut self, step: ProcStep) {
        log::info!("[PROC {:03}] {}", self.entries.len() + 1, step.summary());
        self.entries.push(step);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ProcStep> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcStep> {
        self.entries.iter()
    }

    /// Names of all recorded steps, in order
    pub fn step_names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name.as_str()).collect()
    }

    /// Export as human-readable text
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str("  ODNP Processing History\n");
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str(&format!("  Software:    odnplab v{}\n", env!("CARGO_PKG_VERSION")));
        out.push_str(&format!("  Steps:       {}\n", self.entries.len()));
        out.push_str("───────────────────────────────────────────────────────────────\n\n");

        for (i, step) in self.entries.iter().enumerate() {
            out.push_str(&format!("[{:03}] {}\n", i + 1, step.name));
            for (k, v) in &step.params {
                out.push_str(&format!("      {:<20} {}\n", k, v));
            }
            out.push('\n');
        }

        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str(&format!(
            "  Exported: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

impl<'a> IntoIterator for &'a ProcHistory {
    type Item = &'a ProcStep;
    type IntoIter = std::slice::Iter<'a, ProcStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
