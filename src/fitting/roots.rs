//! Bracketed scalar root finding, driven by argmin's Brent solver.

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::brent::BrentRoot;

use crate::error::{DnpError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootOptions {
    pub max_iterations: u64,
    /// Absolute tolerance on the root
    pub xtol: f64,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            xtol: 2e-12,
        }
    }
}

/// Exposes a scalar closure as an argmin cost function
struct ScalarProblem<F>(F);

impl<F> CostFunction for ScalarProblem<F>
where
    F: Fn(f64) -> f64,
{
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &f64) -> std::result::Result<f64, Error> {
        Ok((self.0)(*x))
    }
}

/// Root of `f` inside `[a, b]`; `f(a)` and `f(b)` must differ in sign
pub fn brentq<F>(f: F, a: f64, b: f64, options: &RootOptions) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    let (fa, fb) = (f(a), f(b));
    if !fa.is_finite() || !fb.is_finite() {
        return Err(DnpError::fit_failed(format!(
            "function not finite at bracket [{}, {}]",
            a, b
        )));
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa.signum() == fb.signum() {
        return Err(DnpError::fit_failed(format!(
            "root not bracketed: f({}) = {:.4e}, f({}) = {:.4e}",
            a, fa, b, fb
        )));
    }

    let solver = BrentRoot::new(a.min(b), a.max(b), options.xtol);
    let result = Executor::new(ScalarProblem(f), solver)
        .configure(|state| state.param(b).max_iters(options.max_iterations))
        .run()
        .map_err(|e| DnpError::fit_failed(format!("root search failed: {}", e)))?;
    let state = result.state();

    if let TerminationStatus::Terminated(TerminationReason::MaxItersReached) = state.get_termination_status() {
        return Err(DnpError::fit_failed(format!(
            "root search did not converge in {} iterations",
            options.max_iterations
        )));
    }
    let root = state
        .get_best_param()
        .copied()
        .ok_or_else(|| DnpError::fit_failed("root search returned no estimate"))?;
    if !root.is_finite() {
        return Err(DnpError::fit_failed(format!("root search diverged to {}", root)));
    }
    Ok(root)
}
