pub mod hydration;

pub use hydration::{
    coupling_factor, hydration, hydration_arrays, smax, solve_tcorr, HydrationParameters, HydrationResults,
    SmaxModel, T1InterpMethod,
};
