//! ODNP NMR data processing.
//!
//! Labelled N-dimensional data (`NDData`), the processing operators that
//! take raw transients to integrated spectra, relaxation and saturation
//! fits, CPMG echo integration and the hydration-dynamics solver.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod fitting;
pub mod io;
pub mod log;
pub mod math;
pub mod pipeline;

pub use config::{config, Config};
pub use data::{concat, AttrValue, Attrs, Coords, NDData, Selector};
pub use error::{DnpError, Result};
pub use log::history::{ProcHistory, ProcStep};
