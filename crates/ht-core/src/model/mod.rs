//! The seams between the inference machinery and a statistical model.
//!
//! A [`Model`] decides which state each scope tracks, which event types it
//! needs, and what the latent transition rates and observation likelihoods
//! are. Its [`Parameters`] blocks accumulate sufficient statistics from the
//! committed history graph and redraw themselves.

pub mod basic;

use ht_common::{Colonization, Error, FacilityId, PatientId, Result, StateSpace, UnitId};
use ht_math::SquareMatrix;

use crate::event::{EventType, TestKind};
use crate::history::{Chain, HistoryGraph, LinkId};
use crate::random::RandomSource;
use crate::state::{Counts, PatientState, State};

pub use basic::BasicModel;

/// What a patient is exposed to: the unit's occupants other than the
/// patient at some instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Neighborhood {
    pub unit: Option<UnitId>,
    pub counts: Counts,
}

impl Neighborhood {
    pub fn new(unit: UnitId, counts: Counts) -> Self {
        Neighborhood {
            unit: Some(unit),
            counts,
        }
    }

    pub fn colonized(&self) -> f64 {
        self.counts.colonized.max(0) as f64
    }
}

/// Statistical model plugged into graph build, sampler and runner.
pub trait Model {
    fn state_space(&self) -> StateSpace;

    fn make_system_state(&self) -> Option<State>;
    fn make_facility_state(&self, facility: FacilityId) -> Option<State>;
    fn make_unit_state(&self, unit: UnitId) -> Option<State>;
    fn make_patient_state(&self, patient: PatientId) -> Option<State>;

    /// Whether the history graph should keep events of this type.
    fn need_event_type(&self, kind: EventType) -> bool;

    /// Latent events from the input are ground truth to start from.
    fn is_cheating(&self) -> bool {
        false
    }

    fn log_acquisition_rate(&self, time: f64, patient: &PatientState, nb: &Neighborhood) -> f64;
    fn log_progression_rate(&self, time: f64, patient: &PatientState, nb: &Neighborhood) -> f64;
    fn log_clearance_rate(&self, time: f64, patient: &PatientState, nb: &Neighborhood) -> f64;

    /// Integrated acquisition hazard over `[t0, t1)`. The default holds the
    /// rate at its `t0` value; time-varying models override it.
    fn acquisition_gap(&self, t0: f64, t1: f64, patient: &PatientState, nb: &Neighborhood) -> f64 {
        self.log_acquisition_rate(t0, patient, nb).exp() * (t1 - t0)
    }

    fn progression_gap(&self, t0: f64, t1: f64, patient: &PatientState, nb: &Neighborhood) -> f64 {
        self.log_progression_rate(t0, patient, nb).exp() * (t1 - t0)
    }

    fn clearance_gap(&self, t0: f64, t1: f64, patient: &PatientState, nb: &Neighborhood) -> f64 {
        self.log_clearance_rate(t0, patient, nb).exp() * (t1 - t0)
    }

    /// Probabilities of each state (state-space index order) at admission.
    fn admission_distribution(&self, patient: &PatientState) -> Vec<f64>;

    /// P(result | status) for one test.
    fn test_likelihood(&self, kind: TestKind, positive: bool, status: Colonization) -> f64;

    /// Parameter blocks in output column order.
    fn parameters(&self) -> Vec<&dyn Parameters>;
    fn parameters_mut(&mut self) -> Vec<&mut dyn Parameters>;

    /// CTMC generator for one patient, in state-space index order.
    ///
    /// Fails with [`Error::DegenerateRate`] when a rate is NaN or infinite;
    /// a log-rate of negative infinity is a zero rate.
    fn rate_matrix(&self, time: f64, patient: &PatientState, nb: &Neighborhood) -> Result<SquareMatrix> {
        let space = self.state_space();
        let acq = checked_rate("acquisition", self.log_acquisition_rate(time, patient, nb))?;
        let clr = checked_rate("clearance", self.log_clearance_rate(time, patient, nb))?;
        let prg = if space.size() == 3 {
            checked_rate("progression", self.log_progression_rate(time, patient, nb))?
        } else {
            0.0
        };
        Ok(generator(space, acq, prg, clr))
    }

    /// Generator held constant over `[t0, t1)`: each rate is its gap
    /// integral divided by the width. Falls back to [`Model::rate_matrix`]
    /// at `t0` for an empty window.
    fn mean_rate_matrix(&self, t0: f64, t1: f64, patient: &PatientState, nb: &Neighborhood) -> Result<SquareMatrix> {
        let width = t1 - t0;
        if !(width > 0.0) {
            return self.rate_matrix(t0, patient, nb);
        }
        let space = self.state_space();
        let acq = checked_mean("acquisition", self.acquisition_gap(t0, t1, patient, nb), width)?;
        let clr = checked_mean("clearance", self.clearance_gap(t0, t1, patient, nb), width)?;
        let prg = if space.size() == 3 {
            checked_mean("progression", self.progression_gap(t0, t1, patient, nb), width)?
        } else {
            0.0
        };
        Ok(generator(space, acq, prg, clr))
    }
}

fn generator(space: StateSpace, acq: f64, prg: f64, clr: f64) -> SquareMatrix {
    let n = space.size();
    let mut q = SquareMatrix::zeros(n);
    let u = 0;
    let c = n - 1;
    q.set(u, space.index(space.acquired()).unwrap_or(c), acq);
    q.set(c, u, clr);
    if n == 3 {
        q.set(1, 2, prg);
    }
    for i in 0..n {
        let off: f64 = (0..n).filter(|j| *j != i).map(|j| q.get(i, j)).sum();
        q.set(i, i, -off);
    }
    q
}

fn checked_mean(rate: &'static str, integral: f64, width: f64) -> Result<f64> {
    let value = integral / width;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::DegenerateRate { rate, value });
    }
    Ok(value)
}

fn checked_rate(rate: &'static str, log_rate: f64) -> Result<f64> {
    let value = log_rate.exp();
    if log_rate.is_nan() || !value.is_finite() {
        return Err(Error::DegenerateRate {
            rate,
            value: log_rate,
        });
    }
    Ok(value)
}

/// One block of model parameters with its sufficient statistics.
pub trait Parameters {
    /// Reset accumulated statistics.
    fn init_counts(&mut self);

    /// Accumulate the statistics contributed by one committed link.
    fn count(&mut self, graph: &HistoryGraph, link: LinkId);

    /// Accumulate exposure between consecutive unit-chain links.
    fn count_gap(&mut self, graph: &HistoryGraph, from: LinkId, to: LinkId);

    /// Redraw from the conditional posterior, or move to its mode.
    fn update(&mut self, rng: &mut dyn RandomSource, maximize: bool) -> Result<()>;

    fn log_prob(&self, graph: &HistoryGraph, link: LinkId) -> f64;

    fn log_prob_gap(&self, graph: &HistoryGraph, from: LinkId, to: LinkId) -> f64;

    /// Prior log-density at the current values.
    fn log_prior(&self) -> f64;

    /// Column names for [`Parameters::values`].
    fn header(&self) -> Vec<String>;

    fn values(&self) -> Vec<f64>;
}

/// Consecutive link pairs of every unit chain.
fn unit_gaps(graph: &HistoryGraph) -> Vec<(LinkId, LinkId)> {
    let mut gaps = Vec::new();
    for unit in graph.unit_ids() {
        let mut prev = None;
        for link in graph.iter_from(graph.unit_head(unit), Chain::Unit) {
            if let Some(p) = prev {
                gaps.push((p, link));
            }
            prev = Some(link);
        }
    }
    gaps
}

/// Reset a block and recount its statistics over the whole graph.
pub fn accumulate(graph: &HistoryGraph, block: &mut dyn Parameters) {
    block.init_counts();
    for link in graph.system_links() {
        block.count(graph, link);
    }
    for (from, to) in unit_gaps(graph) {
        block.count_gap(graph, from, to);
    }
}

/// Complete-data log-likelihood of the committed graph under `model`.
pub fn log_likelihood<M: Model + ?Sized>(graph: &HistoryGraph, model: &M) -> f64 {
    let gaps = unit_gaps(graph);
    let mut total = 0.0;
    for block in model.parameters() {
        total += graph
            .system_links()
            .map(|link| block.log_prob(graph, link))
            .sum::<f64>();
        total += gaps
            .iter()
            .map(|(from, to)| block.log_prob_gap(graph, *from, *to))
            .sum::<f64>();
    }
    total
}

/// Sum of every block's prior log-density.
pub fn log_prior<M: Model + ?Sized>(model: &M) -> f64 {
    model.parameters().iter().map(|p| p.log_prior()).sum()
}

/// Unnormalized log-posterior: complete-data likelihood plus priors.
pub fn log_posterior<M: Model + ?Sized>(graph: &HistoryGraph, model: &M) -> f64 {
    log_likelihood(graph, model) + log_prior(model)
}
