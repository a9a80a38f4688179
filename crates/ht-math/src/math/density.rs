//! Prior log-densities and posterior modes for the conjugate parameter
//! blocks.
//!
//! Gamma uses the **rate parameterization** `Gamma(α, β)`:
//! `f(t) = β^α / Γ(α) * t^(α-1) * e^(-βt)`.
//!
//! Invalid hyperparameters give NaN; points outside the support give
//! negative infinity.

use super::stable::{log_beta, log_gamma};

fn valid(params: &[f64]) -> bool {
    params.iter().all(|p| *p > 0.0)
}

/// Log of the Gamma(alpha, beta) density at t.
pub fn gamma_log_pdf(t: f64, alpha: f64, beta: f64) -> f64 {
    if t.is_nan() || !valid(&[alpha, beta]) {
        return f64::NAN;
    }
    if t < 0.0 {
        return f64::NEG_INFINITY;
    }
    let log_norm = alpha * beta.ln() - log_gamma(alpha);
    if t > 0.0 {
        log_norm + (alpha - 1.0) * t.ln() - beta * t
    } else if alpha < 1.0 {
        f64::INFINITY
    } else if alpha > 1.0 {
        f64::NEG_INFINITY
    } else {
        log_norm
    }
}

/// Mode of Gamma(alpha, beta); zero when alpha < 1.
pub fn gamma_mode(alpha: f64, beta: f64) -> f64 {
    if !valid(&[alpha, beta]) {
        return f64::NAN;
    }
    ((alpha - 1.0) / beta).max(0.0)
}

/// Log of the Beta(alpha, beta) density at x.
pub fn log_beta_pdf(x: f64, alpha: f64, beta: f64) -> f64 {
    if x.is_nan() || !valid(&[alpha, beta]) {
        return f64::NAN;
    }
    if !(0.0..=1.0).contains(&x) {
        return f64::NEG_INFINITY;
    }
    let edge = |shape: f64| match shape {
        s if s < 1.0 => Some(f64::INFINITY),
        s if s > 1.0 => Some(f64::NEG_INFINITY),
        _ => None,
    };
    if x == 0.0 {
        if let Some(v) = edge(alpha) {
            return v;
        }
    }
    if x == 1.0 {
        if let Some(v) = edge(beta) {
            return v;
        }
    }
    let lead = if alpha == 1.0 { 0.0 } else { (alpha - 1.0) * x.ln() };
    let tail = if beta == 1.0 { 0.0 } else { (beta - 1.0) * (-x).ln_1p() };
    lead + tail - log_beta(alpha, beta)
}

/// Mode of Beta(alpha, beta), falling back to the mean when the density
/// has no interior mode.
pub fn beta_mode(alpha: f64, beta: f64) -> f64 {
    if !valid(&[alpha, beta]) {
        return f64::NAN;
    }
    if alpha > 1.0 && beta > 1.0 {
        (alpha - 1.0) / (alpha + beta - 2.0)
    } else {
        alpha / (alpha + beta)
    }
}

/// Log density of Dirichlet(alpha) at the probability vector `p`.
pub fn dirichlet_log_pdf(p: &[f64], alpha: &[f64]) -> f64 {
    if p.len() != alpha.len() || !valid(alpha) {
        return f64::NAN;
    }
    if p.iter().any(|x| !(0.0..=1.0).contains(x)) {
        return f64::NEG_INFINITY;
    }
    let norm = log_gamma(alpha.iter().sum()) - alpha.iter().map(|a| log_gamma(*a)).sum::<f64>();
    p.iter()
        .zip(alpha)
        .filter(|(_, a)| **a != 1.0)
        .fold(norm, |acc, (x, a)| acc + (a - 1.0) * x.ln())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn gamma_shape_one_is_exponential() {
        assert!(close(gamma_log_pdf(2.0, 1.0, 0.5), 0.5f64.ln() - 1.0));
        assert!(close(gamma_log_pdf(0.0, 1.0, 0.5), 0.5f64.ln()));
    }

    #[test]
    fn gamma_support_and_parameters() {
        assert!(gamma_log_pdf(1.0, 0.0, 1.0).is_nan());
        assert_eq!(gamma_log_pdf(-1.0, 2.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(gamma_log_pdf(0.0, 0.5, 1.0), f64::INFINITY);
        // Gamma(2, 1) at 1: e^-1.
        assert!(close(gamma_log_pdf(1.0, 2.0, 1.0), -1.0));
    }

    #[test]
    fn gamma_mode_clamps_at_zero() {
        assert!(close(gamma_mode(3.0, 2.0), 1.0));
        assert_eq!(gamma_mode(0.5, 2.0), 0.0);
    }

    #[test]
    fn beta_density() {
        assert!(close(log_beta_pdf(0.3, 1.0, 1.0), 0.0));
        // Beta(2, 2) is 6x(1-x).
        assert!(close(log_beta_pdf(0.5, 2.0, 2.0), 1.5f64.ln()));
        assert_eq!(log_beta_pdf(1.5, 2.0, 2.0), f64::NEG_INFINITY);
        assert!(close(log_beta_pdf(1.0, 1.0, 1.0), 0.0));
        assert_eq!(log_beta_pdf(0.0, 0.5, 2.0), f64::INFINITY);
    }

    #[test]
    fn beta_mode_interior_and_fallback() {
        assert!(close(beta_mode(3.0, 3.0), 0.5));
        assert!(close(beta_mode(1.0, 3.0), 0.25));
    }

    #[test]
    fn dirichlet_density() {
        // Dirichlet(1,1,1) is uniform on the simplex with density 2.
        assert!(close(dirichlet_log_pdf(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]), 2.0f64.ln()));
        // Dirichlet(2, 1) is Beta(2, 1): density 2x.
        assert!(close(dirichlet_log_pdf(&[0.25, 0.75], &[2.0, 1.0]), 0.5f64.ln()));
        assert!(dirichlet_log_pdf(&[0.5, 0.5], &[1.0]).is_nan());
    }
}
