/// Apodization window kernels
///
/// Every kernel is evaluated on the coordinate `t` of the windowed dim.
/// Index-based kernels (Hamming, Hann, sin²) only use the length of `t`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use ndarray::Array1;

use crate::error::DnpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Exponential,
    Gaussian,
    Hamming,
    Hann,
    SinSquared,
    LorentzGauss,
    Traf,
}

impl WindowKind {
    pub fn name(&self) -> &'static str {
        match self {
            WindowKind::Exponential => "exponential",
            WindowKind::Gaussian => "gaussian",
            WindowKind::Hamming => "hamming",
            WindowKind::Hann => "hann",
            WindowKind::SinSquared => "sin2",
            WindowKind::LorentzGauss => "lorentz_gauss",
            WindowKind::Traf => "traf",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for WindowKind {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" | "exp" => Ok(WindowKind::Exponential),
            "gaussian" | "gauss" => Ok(WindowKind::Gaussian),
            "hamming" => Ok(WindowKind::Hamming),
            "hann" => Ok(WindowKind::Hann),
            "sin2" | "sin_squared" => Ok(WindowKind::SinSquared),
            "lorentz_gauss" => Ok(WindowKind::LorentzGauss),
            "traf" => Ok(WindowKind::Traf),
            other => Err(DnpError::bad_argument(format!("unknown window type '{}'", other))),
        }
    }
}

/// User parameters shared by all kernels; each kernel reads what it needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub linewidth: f64,
    pub gauss_linewidth: f64,
    pub gaussian_max: f64,
}

/// Evaluate the window `kind` on coordinate `t`
pub fn window(kind: WindowKind, t: &Array1<f64>, params: &WindowParams) -> Array1<f64> {
    let n = t.len();
    // Index-based kernels are flat for a single point
    let span = if n > 1 { (n - 1) as f64 } else { 1.0 };
    let lw = params.linewidth;
    let gw = params.gauss_linewidth;

    match kind {
        WindowKind::Exponential => t.mapv(|t| (-2.0 * t * lw).exp()),
        WindowKind::Gaussian => t.mapv(|t| (lw * t - gw * t * t).exp()),
        WindowKind::Hamming => {
            Array1::from_shape_fn(n, |i| 0.53836 + 0.46164 * (PI * i as f64 / span).cos())
        }
        WindowKind::Hann => Array1::from_shape_fn(n, |i| 0.5 + 0.5 * (PI * i as f64 / span).cos()),
        WindowKind::SinSquared => {
            Array1::from_shape_fn(n, |i| (-PI * i as f64 / (2.0 * span) + PI).cos().powi(2))
        }
        WindowKind::LorentzGauss => {
            let g_max = params.gaussian_max;
            t.mapv(|t| {
                let g = 0.6 * PI * gw * (g_max * span - t);
                (PI * lw * t - g * g).exp()
            })
        }
        WindowKind::Traf => {
            let t_max = t.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            t.mapv(|t| {
                let big_e = (-PI * lw * t).exp();
                let e = (PI * gw * (t - t_max)).exp();
                big_e * (big_e + e) / (big_e * big_e + e * e)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn params(lw: f64, gw: f64) -> WindowParams {
        WindowParams {
            linewidth: lw,
            gauss_linewidth: gw,
            gaussian_max: 0.0,
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("exp".parse::<WindowKind>().unwrap(), WindowKind::Exponential);
        assert_eq!("Gaussian".parse::<WindowKind>().unwrap(), WindowKind::Gaussian);
        assert_eq!("sin_squared".parse::<WindowKind>().unwrap(), WindowKind::SinSquared);
        assert!(matches!(
            "kaiser".parse::<WindowKind>(),
            Err(DnpError::BadArgument(_))
        ));
    }

    #[test]
    fn test_exponential() {
        let t = Array1::linspace(0.0, 1.0, 11);
        let w = window(WindowKind::Exponential, &t, &params(2.0, 0.0));
        assert_abs_diff_eq!(w[0], 1.0);
        assert_abs_diff_eq!(w[10], (-4.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_index_kernels_endpoints() {
        let t = Array1::linspace(0.0, 1.0, 5);
        let p = params(1.0, 1.0);
        let hann = window(WindowKind::Hann, &t, &p);
        assert_abs_diff_eq!(hann[0], 1.0);
        assert_abs_diff_eq!(hann[4], 0.0, epsilon = 1e-12);

        let hamming = window(WindowKind::Hamming, &t, &p);
        assert_abs_diff_eq!(hamming[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hamming[4], 0.53836 - 0.46164, epsilon = 1e-12);

        let sin2 = window(WindowKind::SinSquared, &t, &p);
        assert_abs_diff_eq!(sin2[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sin2[4], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_traf_starts_at_one_without_decay() {
        let t = Array1::linspace(0.0, 1.0, 8);
        let w = window(WindowKind::Traf, &t, &params(0.0, 1.0));
        // E = 1 everywhere: E(E+e)/(E²+e²) = (1+e)/(1+e²)
        let e_last = 1.0f64;
        assert_abs_diff_eq!(w[7], (1.0 + e_last) / (1.0 + e_last * e_last), epsilon = 1e-12);
        assert!(w.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_point() {
        let t = Array1::from_elem(1, 0.0);
        let w = window(WindowKind::Hann, &t, &params(1.0, 1.0));
        assert_eq!(w.len(), 1);
        assert_abs_diff_eq!(w[0], 1.0);
    }
}
