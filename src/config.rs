/// Library-wide defaults
///
/// Defaults come from optional TOML files read in cascade; later files
/// override earlier ones key by key:
/// 1. `/etc/odnplab/odnplab.toml`
/// 2. `$HOME/.config/odnplab/odnplab.toml`
/// 3. `./odnplab.toml`
/// 4. the file named by `$ODNPLAB_CONFIG`
///
/// The process-wide instance is read once on first use and never changes
/// afterwards. It only feeds `Default` impls of option structs; explicit
/// arguments always win.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CONFIG_ENV_VAR: &str = "ODNPLAB_CONFIG";
pub const CONFIG_FILE_NAME: &str = "odnplab.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FourierConfig {
    pub zero_fill_factor: usize,
    pub shift: bool,
    pub convert_to_ppm: bool,
}

impl Default for FourierConfig {
    fn default() -> Self {
        Self {
            zero_fill_factor: 1,
            shift: true,
            convert_to_ppm: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub kind: String,
    pub linewidth: f64,
    pub gauss_linewidth: f64,
    pub gaussian_max: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            kind: "exponential".to_string(),
            linewidth: 10.0,
            gauss_linewidth: 1.0,
            gaussian_max: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetConfig {
    pub offset_points: usize,
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self { offset_points: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutophaseConfig {
    pub method: String,
    pub search_points: usize,
    pub force_positive: bool,
}

impl Default for AutophaseConfig {
    fn default() -> Self {
        Self {
            method: "search".to_string(),
            search_points: 180,
            force_positive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-14,
            xtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub smax_model: String,
    pub t1_interp_method: String,
    /// Root bracket for the correlation time, ps
    pub tcorr_bracket_ps: [f64; 2],
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            smax_model: "tethered".to_string(),
            t1_interp_method: "second_order".to_string(),
            tcorr_bracket_ps: [1.0, 1e5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fourier: FourierConfig,
    pub window: WindowConfig,
    pub offset: OffsetConfig,
    pub autophase: AutophaseConfig,
    pub fit: FitConfig,
    pub hydration: HydrationConfig,
}

/// Overlay `overlay` onto `base`, recursing into tables
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(b), toml::Value::Table(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (b, o) => *b = o,
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<toml::Table>(&text)?)
}

impl Config {
    /// Parse a single TOML document; missing keys take built-in defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Cascade the given files in order. Missing files are skipped, any
    /// other failure is an error.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::Table::new());
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let table = read_table(path)?;
            log::debug!("Loaded configuration from {}", path.display());
            merge(&mut merged, toml::Value::Table(table));
        }
        Ok(merged.try_into()?)
    }

    /// Standard search locations, lowest priority first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/odnplab").join(CONFIG_FILE_NAME)];
        if let Ok(home) = std::env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("odnplab")
                    .join(CONFIG_FILE_NAME),
            );
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(p));
        }
        paths
    }

    /// Cascade the standard locations; unreadable files are skipped with a warning
    pub fn load() -> Self {
        let mut merged = toml::Value::Table(toml::Table::new());
        for path in Self::default_paths() {
            if !path.exists() {
                continue;
            }
            match read_table(&path) {
                Ok(table) => merge(&mut merged, toml::Value::Table(table)),
                Err(e) => log::warn!("Ignoring configuration file {}: {}", path.display(), e),
            }
        }
        match merged.try_into() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Invalid configuration, using built-in defaults: {}", e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    static ref CONFIG: Config = Config::load();
}

/// The process-wide configuration
pub fn config() -> &'static Config {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.offset.offset_points, 10);
        assert_eq!(config.autophase.search_points, 180);
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml_str("[fourier]\nzero_fill_factor = 4\n").unwrap();
        assert_eq!(config.fourier.zero_fill_factor, 4);
        assert!(config.fourier.shift);
        assert_eq!(config.window.kind, "exponential");
    }

    #[test]
    fn test_cascade_later_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        let missing = dir.path().join("missing.toml");

        let mut f = std::fs::File::create(&first).unwrap();
        writeln!(f, "[window]\nkind = \"gaussian\"\nlinewidth = 3.0").unwrap();
        let mut f = std::fs::File::create(&second).unwrap();
        writeln!(f, "[window]\nlinewidth = 7.5\n[hydration]\nsmax_model = \"free\"").unwrap();

        let config = Config::from_files(&[first, missing, second]).unwrap();
        assert_eq!(config.window.kind, "gaussian");
        assert_eq!(config.window.linewidth, 7.5);
        assert_eq!(config.hydration.smax_model, "free");
        assert_eq!(config.hydration.t1_interp_method, "second_order");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[fourier\nshift = ").unwrap();
        assert!(Config::from_files(&[bad]).is_err());
    }
}
