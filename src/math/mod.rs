pub mod lineshape;
pub mod poly;
pub mod relaxation;
pub mod window;

/// Trapezoidal weights for integrating samples taken at `x`
pub fn trapz_weights(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut w = vec![0.0; n];
    for i in 0..n.saturating_sub(1) {
        let half = 0.5 * (x[i + 1] - x[i]);
        w[i] += half;
        w[i + 1] += half;
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapz_weights() {
        assert_eq!(trapz_weights(&[0.0, 1.0, 3.0]), vec![0.5, 1.5, 1.0]);
        assert_eq!(trapz_weights(&[2.0]), vec![0.0]);
    }
}
