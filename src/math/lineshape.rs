/// Peak line shapes
use std::f64::consts::PI;

/// Area-normalized Lorentzian with full width at half maximum `fwhm`, scaled by `amplitude`
pub fn lorentzian(x: f64, x0: f64, fwhm: f64, amplitude: f64) -> f64 {
    let gamma = fwhm / 2.0;
    amplitude * gamma / (PI * ((x - x0).powi(2) + gamma * gamma))
}

/// Area-normalized Gaussian with standard deviation `sigma`, scaled by `amplitude`
pub fn gaussian(x: f64, x0: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude / (sigma * (2.0 * PI).sqrt()) * (-(x - x0).powi(2) / (2.0 * sigma * sigma)).exp()
}
