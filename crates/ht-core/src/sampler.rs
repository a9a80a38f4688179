//! Episode-level Gibbs sampler.
//!
//! One step redraws the latent path of a single stay given everything
//! else: the patient's checkpoints are read off its unit chain (every
//! co-resident event changes the neighbourhood, every own test adds
//! evidence), [`Markov`] draws or maximizes a path, and the path's jumps
//! replace the episode's interior through the splice operations. Every
//! proposal is accepted.

use ht_common::{Colonization, Error, Result, StateSpace};
use ht_config::RunSettings;
use tracing::{debug, info};

use crate::episode::EpisodeId;
use crate::event::{Event, EventType};
use crate::history::{Chain, HistoryGraph, LinkId, Scope};
use crate::logging::{event_names, Stage};
use crate::markov::{Checkpoint, Markov, Path};
use crate::model::{Model, Neighborhood};
use crate::random::RandomSource;
use crate::state::{shift_endpoints, PatientState, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sampling,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepSummary {
    pub episodes: usize,
    /// Episodes whose interior or admission grade was rewritten.
    pub committed: usize,
    pub jumps: usize,
    /// Sum of the per-episode evidence log-likelihoods.
    pub logtot: f64,
}

/// Result of resampling one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    pub grade: Colonization,
    pub path: Path,
    pub logtot: f64,
    pub committed: bool,
}

/// Instant at which the patient's CTMC gets a new generator or evidence.
#[derive(Debug, Clone)]
pub(crate) struct Moment {
    pub(crate) time: f64,
    pub(crate) boundary: Vec<f64>,
    pub(crate) neighborhood: Neighborhood,
    pub(crate) patient: PatientState,
}

#[derive(Debug, Clone)]
pub struct Sampler {
    maximize: bool,
    max_rejections: u32,
    phase: Phase,
}

impl Sampler {
    pub fn new(settings: &RunSettings) -> Self {
        Sampler {
            maximize: settings.max_mode,
            max_rejections: settings.max_rejections,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }

    /// Give every episode a starting interior.
    ///
    /// Cheating models keep the interiors read from the input and only
    /// recompute the snapshots; otherwise each episode is drawn once from
    /// its empty interior, so evidence such as a positive test is honoured
    /// from the start.
    pub fn initialize<M, R>(&mut self, graph: &mut HistoryGraph, model: &M, rng: &mut R) -> Result<()>
    where
        M: Model + ?Sized,
        R: RandomSource + ?Sized,
    {
        if model.is_cheating() {
            graph.set_copy_apply()?;
        } else {
            for id in graph.episode_ids().collect::<Vec<_>>() {
                self.resample(graph, model, id, rng)?;
            }
        }
        self.phase = Phase::Sampling;
        info!(
            event = event_names::SAMPLER_INITIALIZED,
            stage = %Stage::Sample,
            episodes = graph.episodes().len(),
            cheating = model.is_cheating(),
            "sampler initialized"
        );
        Ok(())
    }

    /// Resample every episode once. Initializes first when idle; cheating
    /// models keep their ground truth.
    pub fn sweep<M, R>(&mut self, graph: &mut HistoryGraph, model: &M, rng: &mut R) -> Result<SweepSummary>
    where
        M: Model + ?Sized,
        R: RandomSource + ?Sized,
    {
        if self.phase == Phase::Idle {
            self.initialize(graph, model, rng)?;
        }
        let mut summary = SweepSummary::default();
        if model.is_cheating() {
            return Ok(summary);
        }
        for id in graph.episode_ids().collect::<Vec<_>>() {
            let step = self.resample(graph, model, id, rng)?;
            summary.episodes += 1;
            summary.jumps += step.path.jumps.len();
            summary.logtot += step.logtot;
            if step.committed {
                summary.committed += 1;
            }
        }
        Ok(summary)
    }

    /// Redraw one episode's admission grade and interior.
    pub fn resample<M, R>(
        &self,
        graph: &mut HistoryGraph,
        model: &M,
        id: EpisodeId,
        rng: &mut R,
    ) -> Result<Resampled>
    where
        M: Model + ?Sized,
        R: RandomSource + ?Sized,
    {
        let markov = self.problem(graph, model, id)?;
        let path = markov.sample_path(rng, self.maximize)?;
        let space = graph.state_space();
        let grade = status_at(space, path.states[0])?;

        let ep = graph.episode(id);
        let admission = ep.admission;
        let unchanged =
            path.jumps.is_empty() && ep.is_empty() && graph.admission_grade(id) == grade;
        if !unchanged {
            graph.clear_proposal(id);
            let template = *graph.event(admission);
            for jump in &path.jumps {
                let from = status_at(space, jump.from)?;
                let to = status_at(space, jump.to)?;
                let kind = shift_kind(space, from, to).ok_or_else(|| {
                    Error::Inference(format!("no latent event moves {} to {}", from, to))
                })?;
                graph.push_proposal(
                    id,
                    Event {
                        time: jump.time,
                        kind,
                        ..template
                    },
                )?;
            }
            graph.commit_proposal(id, grade)?;
        }

        debug!(
            event = event_names::EPISODE_RESAMPLED,
            stage = %Stage::Sample,
            episode = %id,
            patient = %graph.episode(id).patient,
            grade = %grade,
            jumps = path.jumps.len(),
            logtot = markov.logtot(),
            "episode resampled"
        );
        Ok(Resampled {
            grade,
            logtot: markov.logtot(),
            path,
            committed: !unchanged,
        })
    }

    /// The episode's CTMC problem under the current graph and model.
    pub fn problem<M: Model + ?Sized>(
        &self,
        graph: &HistoryGraph,
        model: &M,
        id: EpisodeId,
    ) -> Result<Markov> {
        let moments = moments(graph, model, id)?;
        let ends: Vec<f64> = moments
            .iter()
            .skip(1)
            .map(|m| m.time)
            .chain(moments.last().map(|m| m.time))
            .collect();
        let checkpoints = moments
            .into_iter()
            .zip(ends)
            .map(|(m, end)| {
                let q = model.mean_rate_matrix(m.time, end, &m.patient, &m.neighborhood)?;
                Ok(Checkpoint::free(m.time, q, m.boundary))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Markov::new(checkpoints, self.max_rejections)?)
    }
}

/// Walk the unit chain across the stay, collecting the patient's
/// checkpoints. Instants with equal time merge: evidence multiplies and the
/// later neighbourhood wins.
pub(crate) fn moments<M: Model + ?Sized>(graph: &HistoryGraph, model: &M, id: EpisodeId) -> Result<Vec<Moment>> {
    let ep = graph.episode(id);
    let space = graph.state_space();
    let mut patient = graph
        .link(ep.admission)
        .patient_state()
        .cloned()
        .unwrap_or_else(|| PatientState::new(ep.patient, space, false));

    let mut out: Vec<Moment> = Vec::new();
    for link in graph.iter_from(Some(ep.admission), Chain::Unit) {
        let e = graph.event(link);
        let own = e.patient == Some(ep.patient);
        if own {
            if let Some(p) = graph.link(link).patient_state() {
                patient = p.clone();
            }
            if e.kind.is_shift() {
                continue;
            }
        }

        let counts = graph
            .state(link, Scope::Unit)
            .and_then(State::counts)
            .map(|c| {
                if link == ep.discharge {
                    c
                } else {
                    c.without(patient.status, patient.on_abx())
                }
            })
            .unwrap_or_default();
        let neighborhood = Neighborhood::new(e.unit, counts);

        let mut boundary = if link == ep.admission {
            admission_boundary(model, &patient, space)?
        } else {
            vec![1.0; space.size()]
        };
        if own {
            if let Some((kind, positive)) = e.kind.test() {
                for (b, status) in boundary.iter_mut().zip(space.states()) {
                    *b *= model.test_likelihood(kind, positive, *status);
                }
            }
        }

        match out.last_mut() {
            Some(last) if last.time == e.time => {
                for (a, b) in last.boundary.iter_mut().zip(&boundary) {
                    *a *= b;
                }
                last.neighborhood = neighborhood;
                last.patient = patient.clone();
            }
            _ => out.push(Moment {
                time: e.time,
                boundary,
                neighborhood,
                patient: patient.clone(),
            }),
        }

        if link == ep.discharge {
            return Ok(out);
        }
    }
    Err(Error::GraphConsistency(format!(
        "unit chain of {} ends before its discharge",
        id
    )))
}

fn admission_boundary<M: Model + ?Sized>(
    model: &M,
    patient: &PatientState,
    space: StateSpace,
) -> Result<Vec<f64>> {
    let dist = model.admission_distribution(patient);
    if dist.len() != space.size() {
        return Err(Error::Config(format!(
            "admission distribution has {} states, model has {}",
            dist.len(),
            space.size()
        )));
    }
    Ok(dist)
}

pub(crate) fn status_at(space: StateSpace, index: usize) -> Result<Colonization> {
    space
        .state(index)
        .ok_or_else(|| Error::Inference(format!("state index {} outside {:?}", index, space)))
}

/// Latent event that moves a patient from `from` to `to`.
pub fn shift_kind(space: StateSpace, from: Colonization, to: Colonization) -> Option<EventType> {
    [
        EventType::Acquisition,
        EventType::Progression,
        EventType::Clearance,
    ]
    .into_iter()
    .find(|k| shift_endpoints(*k, space) == Some((from, to)))
}

/// Links of an episode's current interior paired with their event types.
pub fn interior_kinds(graph: &HistoryGraph, id: EpisodeId) -> Vec<(LinkId, EventType)> {
    graph
        .interior(graph.episode(id))
        .into_iter()
        .map(|l| (l, graph.event(l).kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TestKind;
    use crate::model::BasicModel;
    use crate::parse::parse_str;
    use ht_common::PatientId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SCENARIO: &str = "1 10 0 1 0\n1 10 5 1 2\n1 10 10 1 3\n";

    fn scenario_model() -> BasicModel {
        BasicModel::with_defaults(StateSpace::TwoState)
            .with_acquisition(0.1, 0.0)
            .with_clearance(0.0)
            .with_importation(vec![0.9, 0.1])
            .with_test(TestKind::Surveillance, 1.0, 1.0)
    }

    fn build(input: &str, model: &BasicModel) -> HistoryGraph {
        HistoryGraph::build(parse_str(input).events, model).unwrap()
    }

    fn settings(max_mode: bool) -> RunSettings {
        RunSettings::default().with_max_mode(max_mode)
    }

    #[test]
    fn checkpoints_follow_the_unit_chain() {
        let model = scenario_model();
        let g = build(SCENARIO, &model);
        let markov = Sampler::new(&settings(false))
            .problem(&g, &model, EpisodeId(0))
            .unwrap();
        let times: Vec<f64> = markov.checkpoints().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0.0, 5.0, 10.0]);
        assert_eq!(markov.checkpoints()[0].boundary, vec![0.9, 0.1]);
        assert_eq!(markov.checkpoints()[1].boundary, vec![0.0, 1.0]);
        assert_eq!(markov.marginal(1), &[0.0, 1.0]);
    }

    #[test]
    fn max_mode_commits_acquisition_before_positive_test() {
        let model = scenario_model();
        let mut g = build(SCENARIO, &model);
        let mut rng = StdRng::seed_from_u64(1);
        let step = Sampler::new(&settings(true))
            .resample(&mut g, &model, EpisodeId(0), &mut rng)
            .unwrap();
        assert!(step.committed);
        assert_eq!(step.grade, Colonization::Uncolonized);

        let interior = interior_kinds(&g, EpisodeId(0));
        assert_eq!(interior.len(), 1);
        assert_eq!(interior[0].1, EventType::Acquisition);
        assert_eq!(g.event(interior[0].0).time, 2.5);
        g.verify().unwrap();
    }

    #[test]
    fn sampled_paths_always_colonized_at_positive_test() {
        let model = scenario_model();
        let mut g = build(SCENARIO, &model);
        let mut rng = StdRng::seed_from_u64(9);
        let mut sampler = Sampler::new(&settings(false));
        for _ in 0..100 {
            sampler.sweep(&mut g, &model, &mut rng).unwrap();
            let test = g
                .iter_from(g.patient_head(PatientId(1)), Chain::Patient)
                .find(|l| g.event(*l).kind == EventType::PosSurvTest)
                .unwrap();
            assert_eq!(
                g.link(test).patient_state().unwrap().status,
                Colonization::Colonized
            );
        }
        g.verify().unwrap();
        assert_eq!(sampler.phase(), Phase::Sampling);
    }

    #[test]
    fn empty_interior_without_tests_stays_empty() {
        let model = BasicModel::with_defaults(StateSpace::TwoState);
        let mut g = build("1 10 0 1 0\n1 10 10 1 3\n", &model);
        let mut rng = StdRng::seed_from_u64(2);
        let step = Sampler::new(&settings(true))
            .resample(&mut g, &model, EpisodeId(0), &mut rng)
            .unwrap();
        assert!(!step.committed);
        assert!(g.episode(EpisodeId(0)).is_empty());
        assert!(!g.episode(EpisodeId(0)).has_proposal());
    }

    #[test]
    fn zero_length_stay_only_grades_admission() {
        let model = scenario_model();
        let mut g = build("1 10 3 1 0\n1 10 3 1 2\n1 10 3 1 3\n", &model);
        let mut rng = StdRng::seed_from_u64(4);
        let step = Sampler::new(&settings(false))
            .resample(&mut g, &model, EpisodeId(0), &mut rng)
            .unwrap();
        assert_eq!(step.path.states.len(), 1);
        assert_eq!(step.grade, Colonization::Colonized);
        assert_eq!(g.admission_grade(EpisodeId(0)), Colonization::Colonized);
        g.verify().unwrap();
    }

    #[test]
    fn co_resident_shapes_the_neighbourhood() {
        let model = scenario_model().with_cheating(true);
        let input = "\
            1 10 0 1 15\n\
            1 10 1 2 0\n\
            1 10 4 1 3\n\
            1 10 8 2 3\n";
        let g = build(input, &model);
        let episodes = g.episodes();
        let second = (0..episodes.len())
            .map(EpisodeId)
            .find(|id| g.episode(*id).patient == PatientId(2))
            .unwrap();
        let m = moments(&g, &model, second).unwrap();
        let colonized: Vec<i64> = m.iter().map(|x| x.neighborhood.counts.colonized).collect();
        // admission next to patient 1, who leaves at 4
        assert_eq!(colonized, vec![1, 0, 0]);
        let totals: Vec<i64> = m.iter().map(|x| x.neighborhood.counts.total).collect();
        assert_eq!(totals, vec![1, 0, 0]);
    }

    #[test]
    fn degenerate_rates_are_fatal() {
        let model = scenario_model().with_acquisition(f64::NAN, 0.0);
        let mut g = build(SCENARIO, &model);
        let mut rng = StdRng::seed_from_u64(1);
        let err = Sampler::new(&settings(false))
            .resample(&mut g, &model, EpisodeId(0), &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::DegenerateRate { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn cheating_keeps_ground_truth() {
        let model = BasicModel::with_defaults(StateSpace::TwoState).with_cheating(true);
        let mut g = build("1 10 0 1 0\n1 10 2 1 10\n1 10 4 1 3\n", &model);
        let mut rng = StdRng::seed_from_u64(1);
        let mut sampler = Sampler::new(&settings(false));
        let summary = sampler.sweep(&mut g, &model, &mut rng).unwrap();
        assert_eq!(summary.episodes, 0);
        let interior = interior_kinds(&g, EpisodeId(0));
        assert_eq!(interior.len(), 1);
        assert_eq!(g.event(interior[0].0).time, 2.0);
    }

    #[test]
    fn three_state_sweeps_keep_graph_consistent() {
        let model = BasicModel::with_defaults(StateSpace::ThreeState)
            .with_acquisition(0.05, 0.1)
            .with_progression(0.3)
            .with_clearance(0.05);
        let input = "\
            1 10 0 1 0\n\
            1 10 1 2 0\n\
            1 10 3 1 1\n\
            1 10 6 1 2\n\
            1 10 7 2 2\n\
            1 10 9 2 3\n\
            1 10 12 1 3\n";
        let mut g = build(input, &model);
        let mut rng = StdRng::seed_from_u64(17);
        let mut sampler = Sampler::new(&settings(false));
        for _ in 0..30 {
            let summary = sampler.sweep(&mut g, &model, &mut rng).unwrap();
            assert_eq!(summary.episodes, 2);
            assert!(summary.logtot.is_finite());
            g.verify().unwrap();
        }
    }

    #[test]
    fn shift_kinds_by_state_space() {
        let two = StateSpace::TwoState;
        let three = StateSpace::ThreeState;
        use Colonization::*;
        assert_eq!(shift_kind(two, Uncolonized, Colonized), Some(EventType::Acquisition));
        assert_eq!(shift_kind(three, Uncolonized, Latent), Some(EventType::Acquisition));
        assert_eq!(shift_kind(three, Latent, Colonized), Some(EventType::Progression));
        assert_eq!(shift_kind(three, Colonized, Uncolonized), Some(EventType::Clearance));
        assert_eq!(shift_kind(three, Uncolonized, Colonized), None);
    }
}
