/// Relaxation, buildup and saturation models
///
/// All models share the signature `fn(x, params) -> y` so they can be
/// handed to the fitting layer directly. Parameter order is documented
/// per model.

/// Inversion-recovery T1: `[T1, M0, M_inf]` → `M0 − M_inf·exp(−t/T1)`
pub fn t1(t: f64, p: &[f64]) -> f64 {
    p[1] - p[2] * (-t / p[0]).exp()
}

/// Stretched T2 decay: `[T2, M0, p]` → `M0·exp(−2(t/T2)^p)`
pub fn t2_stretched(t: f64, p: &[f64]) -> f64 {
    p[1] * (-2.0 * (t / p[0]).powf(p[2])).exp()
}

/// `[C1, C2, tau]` → `C1 + C2·exp(−t/tau)`
pub fn mono_exp(t: f64, p: &[f64]) -> f64 {
    p[0] + p[1] * (-t / p[2]).exp()
}

/// `[C1, C2, C3, tau1, tau2]` → `C1 + C2·exp(−t/tau1) + C3·exp(−t/tau2)`
pub fn bi_exp(t: f64, p: &[f64]) -> f64 {
    p[0] + p[1] * (-t / p[3]).exp() + p[2] * (-t / p[4]).exp()
}

/// `[C1, C2, tau, p]` → `C1 + C2·exp(−(t/tau)^p)`
pub fn stretched_exp(t: f64, p: &[f64]) -> f64 {
    p[0] + p[1] * (-(t / p[2]).powf(p[3])).exp()
}

/// Polarization buildup: `[C, tau]` → `C·(1 − exp(−t/tau))`
pub fn buildup(t: f64, p: &[f64]) -> f64 {
    p[0] * (1.0 - (-t / p[1]).exp())
}

/// Saturation curve: `[E_max, p_half]` → `E_max·x/(p_half + x)`
pub fn saturation(x: f64, p: &[f64]) -> f64 {
    p[0] * x / (p[1] + x)
}
