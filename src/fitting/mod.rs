pub mod fit;
pub mod least_squares;
pub mod roots;

pub use fit::{
    curve_fit, fit, fit_bi_exp, fit_buildup, fit_gaussian, fit_lorentzian, fit_mono_exp, fit_saturation,
    fit_stretched_exp, fit_t1, fit_t2_stretched, fit_with_jacobian, CurveFit, FitOptions, FitResult,
    POPT_DIM,
};
pub use least_squares::{levenberg_marquardt, LeastSquaresOptions, LeastSquaresResult};
pub use roots::{brentq, RootOptions};
