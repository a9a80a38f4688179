//! Property-based tests for ht-math numerical functions.

use ht_math::{gamma_log_pdf, log_beta_pdf, SquareMatrix};
use proptest::prelude::*;

/// Tolerance for floating point comparisons.
const TOL: f64 = 1e-10;

/// Row-sum tolerance for transition matrices.
const ROW_TOL: f64 = 1e-9;

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return false;
    }
    (a - b).abs() <= tol.max(tol * a.abs().max(b.abs()))
}

/// Random CTMC generator: non-negative off-diagonal rates, rows summing to zero.
fn generator_strategy(n: usize) -> impl Strategy<Value = SquareMatrix> {
    prop::collection::vec(0.0..5.0f64, n * n).prop_map(move |rates| {
        let mut q = SquareMatrix::zeros(n);
        for i in 0..n {
            let mut total = 0.0;
            for j in 0..n {
                if i != j {
                    let r = rates[i * n + j];
                    q.set(i, j, r);
                    total += r;
                }
            }
            q.set(i, i, -total);
        }
        q
    })
}

// ============================================================================
// Matrix exponential of generators
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Every row of exp(Q t) is a probability distribution.
    #[test]
    fn expm_rows_are_distributions(
        q in prop_oneof![generator_strategy(2), generator_strategy(3)],
        t in 1e-4..50.0f64,
    ) {
        let p = q.expm(t).expect("expm of a valid generator");
        for i in 0..p.dim() {
            let sum = p.row_sum(i);
            prop_assert!((sum - 1.0).abs() <= ROW_TOL, "row {} sums to {}", i, sum);
            for &v in p.row(i) {
                prop_assert!(v >= 0.0, "negative transition probability {}", v);
                prop_assert!(v <= 1.0 + ROW_TOL, "transition probability above one {}", v);
            }
        }
    }

    /// Chapman-Kolmogorov: exp(Q s) exp(Q t) = exp(Q (s + t)).
    #[test]
    fn expm_semigroup(q in generator_strategy(3), s in 0.01..5.0f64, t in 0.01..5.0f64) {
        let lhs = q.expm(s).unwrap().mul(&q.expm(t).unwrap()).unwrap();
        let rhs = q.expm(s + t).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                prop_assert!((lhs.get(i, j) - rhs.get(i, j)).abs() < 1e-8,
                    "({},{}) {} vs {}", i, j, lhs.get(i, j), rhs.get(i, j));
            }
        }
    }
}

// ============================================================================
// Prior densities
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Gamma densities integrate to one (midpoint rule on a wide grid).
    #[test]
    fn gamma_density_integrates_to_one(alpha in 1.0..6.0f64, beta in 0.5..4.0f64) {
        let h = 1e-3;
        let total: f64 = (0..60_000)
            .map(|i| gamma_log_pdf((i as f64 + 0.5) * h, alpha, beta).exp() * h)
            .sum();
        prop_assert!(approx_eq(total, 1.0, 1e-4), "Gamma({}, {}) mass {}", alpha, beta, total);
    }

    /// Beta(a, b) at x equals Beta(b, a) at 1 - x.
    #[test]
    fn beta_density_mirrors(x in 0.01..0.99f64, a in 0.5..8.0f64, b in 0.5..8.0f64) {
        let lhs = log_beta_pdf(x, a, b);
        let rhs = log_beta_pdf(1.0 - x, b, a);
        prop_assert!(approx_eq(lhs, rhs, TOL), "{} vs {}", lhs, rhs);
    }
}
