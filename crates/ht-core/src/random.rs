//! Random variate generation on top of an injected uniform source.
//!
//! Everything stochastic in the crate takes `&mut impl RandomSource`; any
//! `rand::Rng` (typically a seeded `StdRng`) is one.

/// A source of uniform variates plus the derived draws the sampler needs.
pub trait RandomSource {
    /// Uniform on [0, 1).
    fn uniform(&mut self) -> f64;

    /// Uniform on (0, 1], safe to take the log of.
    fn uniform_open(&mut self) -> f64 {
        (1.0 - self.uniform()).max(f64::MIN_POSITIVE)
    }

    /// Exponential with the given rate. Infinite for a zero rate.
    fn exponential(&mut self, rate: f64) -> f64 {
        if rate <= 0.0 {
            return f64::INFINITY;
        }
        -self.uniform_open().ln() / rate
    }

    /// Standard normal by Box–Muller.
    fn standard_normal(&mut self) -> f64 {
        let u1 = self.uniform_open();
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Gamma(shape, rate) by Marsaglia–Tsang. NaN for invalid parameters.
    fn gamma(&mut self, shape: f64, rate: f64) -> f64 {
        if !(shape > 0.0 && rate > 0.0) || !shape.is_finite() || !rate.is_finite() {
            return f64::NAN;
        }
        if shape < 1.0 {
            let u = self.uniform_open();
            return self.gamma(shape + 1.0, rate) * u.powf(1.0 / shape);
        }

        let d = shape - 1.0 / 3.0;
        let c = (1.0 / (9.0 * d)).sqrt();
        loop {
            let z = self.standard_normal();
            let v = 1.0 + c * z;
            if v <= 0.0 {
                continue;
            }
            let v = v * v * v;
            let u = self.uniform_open();
            if u < 1.0 - 0.0331 * z * z * z * z
                || u.ln() < 0.5 * z * z + d * (1.0 - v + v.ln())
            {
                return d * v / rate;
            }
        }
    }

    /// Beta(alpha, beta) as a ratio of gammas.
    fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        let x = self.gamma(alpha, 1.0);
        let y = self.gamma(beta, 1.0);
        x / (x + y)
    }

    /// Dirichlet draw from pseudo-counts.
    fn dirichlet(&mut self, alpha: &[f64]) -> Vec<f64> {
        let mut draws: Vec<f64> = alpha.iter().map(|a| self.gamma(*a, 1.0)).collect();
        let total: f64 = draws.iter().sum();
        for d in &mut draws {
            *d /= total;
        }
        draws
    }

    /// Index drawn proportionally to non-negative weights. None when the
    /// weights have no positive finite mass.
    fn categorical(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if !(total > 0.0) || !total.is_finite() {
            return None;
        }
        let mut target = self.uniform() * total;
        let mut last = None;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            last = Some(i);
            if target < *w {
                return Some(i);
            }
            target -= w;
        }
        last
    }

    /// Bernoulli trial.
    fn bernoulli(&mut self, p: f64) -> bool {
        self.uniform() < p
    }
}

impl<R: rand::Rng + ?Sized> RandomSource for R {
    fn uniform(&mut self) -> f64 {
        self.random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mean_of(n: usize, mut f: impl FnMut() -> f64) -> f64 {
        (0..n).map(|_| f()).sum::<f64>() / n as f64
    }

    #[test]
    fn gamma_mean_matches_shape_over_rate() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = mean_of(20_000, || rng.gamma(3.0, 2.0));
        assert!((m - 1.5).abs() < 0.05, "mean {}", m);

        let m = mean_of(20_000, || rng.gamma(0.5, 1.0));
        assert!((m - 0.5).abs() < 0.03, "mean {}", m);
    }

    #[test]
    fn gamma_rejects_bad_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(rng.gamma(0.0, 1.0).is_nan());
        assert!(rng.gamma(1.0, -1.0).is_nan());
    }

    #[test]
    fn beta_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let m = mean_of(20_000, || rng.beta(2.0, 6.0));
        assert!((m - 0.25).abs() < 0.01, "mean {}", m);
    }

    #[test]
    fn categorical_skips_zero_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            assert_eq!(rng.categorical(&[0.0, 2.0, 0.0]), Some(1));
        }
        assert_eq!(rng.categorical(&[0.0, 0.0]), None);
        assert_eq!(rng.categorical(&[f64::NAN]), None);
    }

    #[test]
    fn exponential_zero_rate_never_fires() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(rng.exponential(0.0).is_infinite());
        let m = mean_of(20_000, || rng.exponential(4.0));
        assert!((m - 0.25).abs() < 0.01);
    }

    #[test]
    fn dirichlet_sums_to_one() {
        let mut rng = StdRng::seed_from_u64(9);
        let p = rng.dirichlet(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
