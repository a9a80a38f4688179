//! Continuous-time Markov chain engine for one patient's latent path.
//!
//! A problem is a sequence of checkpoints. Between checkpoint `i` and
//! `i + 1` the chain either evolves freely under the generator `Q_i` or
//! moves by a fixed transition matrix. Each checkpoint carries `S_i`, the
//! likelihood of the evidence at that instant for every state.
//!
//! [`Markov::collect`] runs the backward pass once; checkpoint states are
//! then drawn forward from the normalized conditionals, and the path inside
//! each free interval is drawn conditioned on both endpoints.

use ht_common::Error;
use ht_math::{argmax, log_poisson_pmf, normalize_in_place, MatrixError, SquareMatrix};
use thiserror::Error;
use tracing::warn;

use crate::logging::{event_names, Stage};
use crate::random::RandomSource;

/// Tolerated generator row sum, relative to the row's exit rate.
const ROW_SUM_TOL: f64 = 1e-9;

/// Upper bound on virtual jumps drawn by uniformization.
const MAX_VIRTUAL_JUMPS: u64 = 10_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarkovError {
    #[error("problem has no checkpoints")]
    Empty,

    #[error("free interval after checkpoint {index} (t={time}) has non-positive width")]
    ZeroWidth { index: usize, time: f64 },

    #[error("invalid generator at checkpoint {index}: {reason}")]
    InvalidGenerator { index: usize, reason: String },

    #[error("boundary distribution has zero mass at checkpoint {index}")]
    ZeroMass { index: usize },

    #[error("checkpoint {index} has dimension {actual}, expected {expected}")]
    Dimension {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("transition matrix failed at checkpoint {index}: {source}")]
    Matrix {
        index: usize,
        #[source]
        source: MatrixError,
    },
}

impl From<MarkovError> for Error {
    fn from(err: MarkovError) -> Self {
        match err {
            MarkovError::ZeroMass { .. } | MarkovError::Matrix { .. } => {
                Error::NumericalInstability(err.to_string())
            }
            _ => Error::Inference(err.to_string()),
        }
    }
}

/// How the chain gets from one checkpoint to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Interval {
    /// Evolves under the checkpoint's generator.
    Free,
    /// Moves by the given transition matrix, identity when absent.
    Fixed(Option<SquareMatrix>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub time: f64,
    /// Generator on `[time, next.time)`.
    pub generator: SquareMatrix,
    /// Evidence likelihood per state.
    pub boundary: Vec<f64>,
    pub interval: Interval,
}

impl Checkpoint {
    pub fn free(time: f64, generator: SquareMatrix, boundary: Vec<f64>) -> Self {
        Checkpoint {
            time,
            generator,
            boundary,
            interval: Interval::Free,
        }
    }

    pub fn fixed(time: f64, transition: Option<SquareMatrix>, boundary: Vec<f64>) -> Self {
        Checkpoint {
            time,
            generator: SquareMatrix::zeros(boundary.len()),
            boundary,
            interval: Interval::Fixed(transition),
        }
    }
}

/// A state change strictly inside a free interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    pub time: f64,
    pub from: usize,
    pub to: usize,
}

/// Checkpoint states plus every jump between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub states: Vec<usize>,
    pub jumps: Vec<Jump>,
}

#[derive(Debug, Clone)]
pub struct Markov {
    n: usize,
    checkpoints: Vec<Checkpoint>,
    /// `P_i` for each interval.
    transitions: Vec<SquareMatrix>,
    /// Row-normalized `P_i[j][k] * R_{i+1}[k]`.
    conditional: Vec<SquareMatrix>,
    /// Normalized `R_i`.
    marginal: Vec<Vec<f64>>,
    logtot: f64,
    max_rejections: u32,
}

impl Markov {
    /// Set up and collect a problem.
    pub fn new(checkpoints: Vec<Checkpoint>, max_rejections: u32) -> Result<Self, MarkovError> {
        let n = checkpoints
            .first()
            .map(|c| c.boundary.len())
            .ok_or(MarkovError::Empty)?;
        let mut markov = Markov {
            n,
            checkpoints,
            transitions: Vec::new(),
            conditional: Vec::new(),
            marginal: Vec::new(),
            logtot: 0.0,
            max_rejections: max_rejections.max(1),
        };
        markov.collect()?;
        Ok(markov)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Log-likelihood of all boundary evidence.
    pub fn logtot(&self) -> f64 {
        self.logtot
    }

    /// Normalized backward marginal at checkpoint `i`; at 0 this is the
    /// posterior of the first state.
    pub fn marginal(&self, i: usize) -> &[f64] {
        &self.marginal[i]
    }

    /// Transition distribution out of checkpoint `i` given its state.
    pub fn conditional(&self, i: usize) -> &SquareMatrix {
        &self.conditional[i]
    }

    pub fn transition(&self, i: usize) -> &SquareMatrix {
        &self.transitions[i]
    }

    pub fn set_boundary(&mut self, index: usize, boundary: Vec<f64>) -> Result<(), MarkovError> {
        self.checkpoints[index].boundary = boundary;
        self.collect()
    }

    /// Backward pass: transition matrices, conditionals, marginals and
    /// `logtot`.
    pub fn collect(&mut self) -> Result<(), MarkovError> {
        self.validate()?;
        self.transitions = self.transition_matrices()?;

        let n = self.n;
        let m = self.checkpoints.len();
        let mut marginal = vec![Vec::new(); m];
        let mut conditional = Vec::with_capacity(m.saturating_sub(1));

        let mut r = self.checkpoints[m - 1].boundary.clone();
        let mut logtot = normalize(&mut r, m - 1)?;
        marginal[m - 1] = r;

        for i in (0..m - 1).rev() {
            let p = &self.transitions[i];
            let next = &marginal[i + 1];
            let mut rr = SquareMatrix::zeros(n);
            let mut r = vec![0.0; n];
            for j in 0..n {
                let mut w = 0.0;
                for k in 0..n {
                    let v = p.get(j, k) * next[k];
                    rr.set(j, k, v);
                    w += v;
                }
                if w > 0.0 {
                    for k in 0..n {
                        rr.set(j, k, rr.get(j, k) / w);
                    }
                }
                r[j] = self.checkpoints[i].boundary[j] * w;
            }
            logtot += normalize(&mut r, i)?;
            marginal[i] = r;
            conditional.push(rr);
        }
        conditional.reverse();

        self.marginal = marginal;
        self.conditional = conditional;
        self.logtot = logtot;
        Ok(())
    }

    fn validate(&self) -> Result<(), MarkovError> {
        let n = self.n;
        let m = self.checkpoints.len();
        for (i, c) in self.checkpoints.iter().enumerate() {
            if c.boundary.len() != n {
                return Err(MarkovError::Dimension {
                    index: i,
                    expected: n,
                    actual: c.boundary.len(),
                });
            }
            if c.boundary.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
                return Err(MarkovError::ZeroMass { index: i });
            }
            if i + 1 == m {
                continue;
            }
            let width = self.checkpoints[i + 1].time - c.time;
            match &c.interval {
                Interval::Free => {
                    if !(width > 0.0) {
                        return Err(MarkovError::ZeroWidth {
                            index: i,
                            time: c.time,
                        });
                    }
                    check_generator(i, n, &c.generator)?;
                }
                Interval::Fixed(Some(p)) if p.dim() != n => {
                    return Err(MarkovError::Dimension {
                        index: i,
                        expected: n,
                        actual: p.dim(),
                    });
                }
                Interval::Fixed(_) => {}
            }
        }
        Ok(())
    }

    fn transition_matrices(&self) -> Result<Vec<SquareMatrix>, MarkovError> {
        self.checkpoints
            .windows(2)
            .enumerate()
            .map(|(i, pair)| match &pair[0].interval {
                Interval::Free => pair[0]
                    .generator
                    .expm(pair[1].time - pair[0].time)
                    .map_err(|source| MarkovError::Matrix { index: i, source }),
                Interval::Fixed(Some(p)) => Ok(p.clone()),
                Interval::Fixed(None) => Ok(SquareMatrix::identity(self.n)),
            })
            .collect()
    }

    /// Checkpoint states: `state_0 ~ R_0`, `state_i ~ RR_{i-1}[state_{i-1}]`,
    /// or the argmax of each in max mode.
    pub fn simulate_chain<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        maximize: bool,
    ) -> Result<Vec<usize>, MarkovError> {
        let m = self.checkpoints.len();
        let mut states = Vec::with_capacity(m);
        let first = pick(&self.marginal[0], rng, maximize).ok_or(MarkovError::ZeroMass { index: 0 })?;
        states.push(first);
        for i in 0..m - 1 {
            let row = self.conditional[i].row(states[i]);
            let next = pick(row, rng, maximize).ok_or(MarkovError::ZeroMass { index: i + 1 })?;
            states.push(next);
        }
        Ok(states)
    }

    /// Jumps inside interval `index` for a path from `from` to `to`.
    ///
    /// Sampling uses modified rejection: forward simulation, with the first
    /// jump forced into the interval when the endpoints differ, retried up
    /// to the rejection cap, then exact uniformization. Max mode places the
    /// fewest jumps that connect the endpoints evenly across the interval.
    pub fn simulate_process<R: RandomSource + ?Sized>(
        &self,
        index: usize,
        from: usize,
        to: usize,
        rng: &mut R,
        maximize: bool,
    ) -> Result<Vec<Jump>, MarkovError> {
        let c = &self.checkpoints[index];
        if !matches!(c.interval, Interval::Free) {
            return Ok(Vec::new());
        }
        let t0 = c.time;
        let t1 = self.checkpoints[index + 1].time;
        if self.transitions[index].get(from, to) <= 0.0 {
            return Err(MarkovError::ZeroMass { index: index + 1 });
        }
        if maximize {
            return even_jumps(index, &c.generator, from, to, t0, t1);
        }

        for _ in 0..self.max_rejections {
            if let Some(jumps) = forward_attempt(&c.generator, from, to, t0, t1, rng) {
                return Ok(jumps);
            }
        }
        warn!(
            event = event_names::UNIFORMIZATION_FALLBACK,
            stage = %Stage::Sample,
            checkpoint = index,
            attempts = self.max_rejections,
            "rejection sampling exhausted; using uniformization"
        );
        self.uniformization(index, from, to, rng)
    }

    /// Exact endpoint-conditioned sampling by uniformization.
    fn uniformization<R: RandomSource + ?Sized>(
        &self,
        index: usize,
        from: usize,
        to: usize,
        rng: &mut R,
    ) -> Result<Vec<Jump>, MarkovError> {
        let n = self.n;
        let q = &self.checkpoints[index].generator;
        let t0 = self.checkpoints[index].time;
        let span = self.checkpoints[index + 1].time - t0;
        let p_end = self.transitions[index].get(from, to);

        let mu = (0..n).map(|i| -q.get(i, i)).fold(0.0, f64::max);
        if mu <= 0.0 {
            return if from == to {
                Ok(Vec::new())
            } else {
                Err(MarkovError::ZeroMass { index: index + 1 })
            };
        }
        let matrix_err = |source| MarkovError::Matrix { index, source };
        let r = SquareMatrix::identity(n)
            .add_scaled(q, 1.0 / mu)
            .map_err(matrix_err)?;

        let u = rng.uniform();
        let mut powers = vec![SquareMatrix::identity(n)];
        let mut cdf = 0.0;
        let mut count: u64 = 0;
        loop {
            let last = &powers[powers.len() - 1];
            cdf += log_poisson_pmf(count, mu * span).exp() * last.get(from, to) / p_end;
            if u < cdf || count >= MAX_VIRTUAL_JUMPS {
                break;
            }
            let next = last.mul(&r).map_err(matrix_err)?;
            powers.push(next);
            count += 1;
        }

        let mut times: Vec<f64> = (0..count).map(|_| interior_time(t0, span, rng)).collect();
        times.sort_by(f64::total_cmp);

        let mut state = from;
        let mut jumps = Vec::new();
        for (k, time) in times.into_iter().enumerate() {
            let remaining = &powers[count as usize - k - 1];
            let weights: Vec<f64> = (0..n).map(|j| r.get(state, j) * remaining.get(j, to)).collect();
            let next = rng
                .categorical(&weights)
                .ok_or(MarkovError::ZeroMass { index: index + 1 })?;
            if next != state {
                jumps.push(Jump {
                    time,
                    from: state,
                    to: next,
                });
            }
            state = next;
        }
        Ok(jumps)
    }

    /// Checkpoint states and every interval's jumps.
    pub fn sample_path<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        maximize: bool,
    ) -> Result<Path, MarkovError> {
        let states = self.simulate_chain(rng, maximize)?;
        let mut jumps = Vec::new();
        for i in 0..states.len() - 1 {
            jumps.extend(self.simulate_process(i, states[i], states[i + 1], rng, maximize)?);
        }
        Ok(Path { states, jumps })
    }

    /// Posterior log-probability of checkpoint states alone.
    pub fn log_prob_states(&self, states: &[usize]) -> f64 {
        if states.len() != self.checkpoints.len() {
            return f64::NEG_INFINITY;
        }
        let mut lp = -self.logtot;
        for (i, s) in states.iter().enumerate() {
            lp += self.checkpoints[i].boundary[*s].ln();
            if i + 1 < states.len() {
                lp += self.transitions[i].get(*s, states[i + 1]).ln();
            }
        }
        lp
    }

    /// Posterior log-density of a full path: holding times and jump rates
    /// inside free intervals, fixed transitions, and boundary evidence.
    pub fn log_prob(&self, path: &Path) -> f64 {
        let m = self.checkpoints.len();
        if path.states.len() != m {
            return f64::NEG_INFINITY;
        }
        let mut lp = -self.logtot;
        for (i, s) in path.states.iter().enumerate() {
            lp += self.checkpoints[i].boundary[*s].ln();
        }

        let mut jumps = path.jumps.iter().peekable();
        for i in 0..m - 1 {
            let c = &self.checkpoints[i];
            let t1 = self.checkpoints[i + 1].time;
            let (start, end) = (path.states[i], path.states[i + 1]);
            match &c.interval {
                Interval::Fixed(_) => {
                    lp += self.transitions[i].get(start, end).ln();
                }
                Interval::Free => {
                    let q = &c.generator;
                    let mut state = start;
                    let mut t = c.time;
                    while let Some(j) = jumps.next_if(|j| j.time < t1) {
                        if j.from != state || j.time < t || j.to == state {
                            return f64::NEG_INFINITY;
                        }
                        lp += q.get(state, state) * (j.time - t) + q.get(state, j.to).ln();
                        state = j.to;
                        t = j.time;
                    }
                    lp += q.get(state, state) * (t1 - t);
                    if state != end {
                        return f64::NEG_INFINITY;
                    }
                }
            }
        }
        if jumps.next().is_some() {
            return f64::NEG_INFINITY;
        }
        lp
    }
}

fn normalize(weights: &mut [f64], index: usize) -> Result<f64, MarkovError> {
    let total = normalize_in_place(weights);
    if total > 0.0 && total.is_finite() {
        Ok(total.ln())
    } else {
        Err(MarkovError::ZeroMass { index })
    }
}

fn check_generator(index: usize, n: usize, q: &SquareMatrix) -> Result<(), MarkovError> {
    let invalid = |reason: String| MarkovError::InvalidGenerator { index, reason };
    if q.dim() != n {
        return Err(MarkovError::Dimension {
            index,
            expected: n,
            actual: q.dim(),
        });
    }
    q.check_finite()
        .map_err(|e| invalid(e.to_string()))?;
    for i in 0..n {
        for j in 0..n {
            if i != j && q.get(i, j) < 0.0 {
                return Err(invalid(format!("negative rate {} at ({}, {})", q.get(i, j), i, j)));
            }
        }
        let sum = q.row_sum(i);
        if sum.abs() > ROW_SUM_TOL * q.get(i, i).abs().max(1.0) {
            return Err(invalid(format!("row {} sums to {}", i, sum)));
        }
    }
    Ok(())
}

fn pick<R: RandomSource + ?Sized>(weights: &[f64], rng: &mut R, maximize: bool) -> Option<usize> {
    if maximize {
        argmax(weights).filter(|i| weights[*i] > 0.0)
    } else {
        rng.categorical(weights)
    }
}

/// A time strictly inside `(t0, t0 + span)`.
fn interior_time<R: RandomSource + ?Sized>(t0: f64, span: f64, rng: &mut R) -> f64 {
    loop {
        let t = t0 + span * rng.uniform();
        if t > t0 && t < t0 + span {
            return t;
        }
    }
}

/// One forward simulation; None when it ends in the wrong state.
fn forward_attempt<R: RandomSource + ?Sized>(
    q: &SquareMatrix,
    from: usize,
    to: usize,
    t0: f64,
    t1: f64,
    rng: &mut R,
) -> Option<Vec<Jump>> {
    let n = q.dim();
    let mut jumps = Vec::new();
    let mut state = from;
    let mut t = t0;
    loop {
        let rate = -q.get(state, state);
        let wait = if from != to && jumps.is_empty() {
            if rate <= 0.0 {
                return None;
            }
            // first jump conditioned to land before t1
            let u = rng.uniform_open();
            -(1.0 - u * (1.0 - (-rate * (t1 - t0)).exp())).ln() / rate
        } else {
            rng.exponential(rate)
        };
        t += wait;
        if t >= t1 {
            break;
        }
        if t <= t0 {
            return None;
        }
        let weights: Vec<f64> = (0..n)
            .map(|k| if k == state { 0.0 } else { q.get(state, k) })
            .collect();
        let next = rng.categorical(&weights)?;
        jumps.push(Jump {
            time: t,
            from: state,
            to: next,
        });
        state = next;
    }
    (state == to).then_some(jumps)
}

/// Shortest jump sequence from `from` to `to`, evenly spaced.
fn even_jumps(
    index: usize,
    q: &SquareMatrix,
    from: usize,
    to: usize,
    t0: f64,
    t1: f64,
) -> Result<Vec<Jump>, MarkovError> {
    if from == to {
        return Ok(Vec::new());
    }
    let n = q.dim();
    let mut parent: Vec<Option<usize>> = vec![None; n];
    let mut seen = vec![false; n];
    let mut queue = std::collections::VecDeque::from([from]);
    seen[from] = true;
    while let Some(s) = queue.pop_front() {
        for k in 0..n {
            if k != s && !seen[k] && q.get(s, k) > 0.0 {
                seen[k] = true;
                parent[k] = Some(s);
                queue.push_back(k);
            }
        }
    }
    if !seen[to] {
        return Err(MarkovError::ZeroMass { index: index + 1 });
    }

    let mut route = vec![to];
    let mut cursor = to;
    while let Some(p) = parent[cursor] {
        route.push(p);
        cursor = p;
    }
    route.reverse();

    let steps = route.len() - 1;
    let spacing = (t1 - t0) / (steps + 1) as f64;
    Ok(route
        .windows(2)
        .enumerate()
        .map(|(k, pair)| Jump {
            time: t0 + spacing * (k + 1) as f64,
            from: pair[0],
            to: pair[1],
        })
        .collect())
}
