//! Forward-backward engine: normalization and likelihood consistency.

use ht_core::markov::{Checkpoint, Markov};
use ht_math::SquareMatrix;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn two_state(up: f64, down: f64) -> SquareMatrix {
    let mut q = SquareMatrix::zeros(2);
    q.set(0, 1, up);
    q.set(0, 0, -up);
    q.set(1, 0, down);
    q.set(1, 1, -down);
    q
}

fn problem(up: f64, down: f64, times: &[f64], boundaries: &[[f64; 2]]) -> Markov {
    let checkpoints = times
        .iter()
        .zip(boundaries)
        .map(|(t, b)| Checkpoint::free(*t, two_state(up, down), b.to_vec()))
        .collect();
    Markov::new(checkpoints, 1000).unwrap()
}

fn boundary_strategy() -> impl Strategy<Value = [f64; 2]> {
    (0.05f64..1.0, 0.05f64..1.0).prop_map(|(a, b)| [a, b])
}

fn setup_strategy() -> impl Strategy<Value = (f64, f64, Vec<f64>, Vec<[f64; 2]>)> {
    (1usize..5).prop_flat_map(|n| {
        (
            0.0f64..2.0,
            0.0f64..2.0,
            prop::collection::vec(0.1f64..5.0, n),
            prop::collection::vec(boundary_strategy(), n),
        )
            .prop_map(|(up, down, gaps, boundaries)| {
                let mut t = 0.0;
                let times = gaps
                    .iter()
                    .map(|g| {
                        let now = t;
                        t += g;
                        now
                    })
                    .collect();
                (up, down, times, boundaries)
            })
    })
}

fn all_chains(n: usize) -> Vec<Vec<usize>> {
    (0..1usize << n)
        .map(|bits| (0..n).map(|i| (bits >> i) & 1).collect())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn conditionals_and_marginals_are_distributions((up, down, times, bounds) in setup_strategy()) {
        let m = problem(up, down, &times, &bounds);
        for i in 0..m.len() {
            let s: f64 = m.marginal(i).iter().sum();
            prop_assert!((s - 1.0).abs() < 1e-9, "marginal {} sums to {}", i, s);
        }
        for i in 0..m.len().saturating_sub(1) {
            for row in 0..2 {
                let s = m.conditional(i).row_sum(row);
                prop_assert!(s == 0.0 || (s - 1.0).abs() < 1e-9);
            }
        }
        prop_assert!(m.logtot().is_finite());
    }

    #[test]
    fn checkpoint_posteriors_sum_to_one((up, down, times, bounds) in setup_strategy()) {
        let m = problem(up, down, &times, &bounds);
        let total: f64 = all_chains(m.len())
            .iter()
            .map(|c| m.log_prob_states(c).exp())
            .sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "total {}", total);
    }

    #[test]
    fn sampled_paths_are_consistent((up, down, times, bounds) in setup_strategy(), seed in any::<u64>()) {
        let m = problem(up, down, &times, &bounds);
        let mut rng = StdRng::seed_from_u64(seed);
        let path = m.sample_path(&mut rng, false).unwrap();
        prop_assert_eq!(path.states.len(), m.len());
        let mut state = path.states[0];
        for j in &path.jumps {
            prop_assert_eq!(j.from, state);
            prop_assert!(j.from != j.to);
            state = j.to;
        }
        prop_assert_eq!(state, *path.states.last().unwrap());
        prop_assert!(m.log_prob(&path).is_finite());
    }
}

#[test]
fn positive_test_forces_colonization() {
    let m = Markov::new(
        vec![
            Checkpoint::free(0.0, two_state(0.1, 0.0), vec![0.9, 0.1]),
            Checkpoint::free(5.0, two_state(0.1, 0.0), vec![0.0, 1.0]),
            Checkpoint::free(10.0, two_state(0.1, 0.0), vec![1.0, 1.0]),
        ],
        1000,
    )
    .unwrap();
    let p = 1.0 - (-0.5f64).exp();
    assert!((m.logtot() - (0.9 * p + 0.1).ln()).abs() < 1e-12);

    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..200 {
        let path = m.sample_path(&mut rng, false).unwrap();
        assert_eq!(path.states[1], 1);
        for j in &path.jumps {
            assert!(j.time > 0.0 && j.time < 5.0);
        }
    }

    let best = m.sample_path(&mut rng, true).unwrap();
    assert_eq!(best.states, vec![0, 1, 1]);
    assert_eq!(best.jumps.len(), 1);
    assert!(best.jumps[0].time > 0.0 && best.jumps[0].time < 5.0);
}
