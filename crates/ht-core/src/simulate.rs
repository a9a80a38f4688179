//! Forward simulation on the observed admission/discharge skeleton.
//!
//! Every inferred interior is dropped first. The system chain is then
//! walked forward in time. Each admission draws its grade from the model's
//! importation distribution. Between consecutive observed events every
//! current occupant competes with its own acquisition, progression and
//! clearance rates, read from the live occupancy of its unit; the earliest
//! shift is applied, the unit counts move, and all rates are redrawn.
//! Test results are drawn from the occupant's status at the test time.
//!
//! The graph keeps the simulated latent state; redrawn test results live
//! only in the returned event list.

use std::collections::{BTreeMap, HashMap};

use ht_common::{Colonization, Error, PatientId, Result, StateSpace, UnitId};
use tracing::{debug, info};

use crate::episode::EpisodeId;
use crate::event::{Event, EventType};
use crate::history::{HistoryGraph, LinkId};
use crate::logging::{event_names, Stage};
use crate::model::{Model, Neighborhood};
use crate::random::RandomSource;
use crate::sampler::{shift_kind, status_at};
use crate::state::{Counts, PatientState};

/// A simulated data set.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    /// Every event in system order, tests carrying redrawn results.
    pub events: Vec<Event>,
    pub episodes: usize,
    /// Latent status changes drawn.
    pub shifts: usize,
    pub imported: usize,
    pub positive_tests: usize,
}

/// A patient on a unit during the walk.
struct Occupant {
    episode: EpisodeId,
    unit: UnitId,
    /// Snapshot of the patient's own chain, status kept live.
    patient: PatientState,
    /// Index into the state space.
    state: usize,
}

/// One latent jump: time, from, to.
type Jump = (f64, usize, usize);

/// Replace the graph's latent state and test results with a forward draw.
pub fn simulate<M, R>(graph: &mut HistoryGraph, model: &M, rng: &mut R) -> Result<Simulation>
where
    M: Model + ?Sized,
    R: RandomSource + ?Sized,
{
    let ids: Vec<EpisodeId> = graph.episode_ids().collect();
    for id in &ids {
        graph.clear_proposal(*id);
        graph.commit_proposal(*id, Colonization::Uncolonized)?;
    }
    let by_admission: HashMap<LinkId, EpisodeId> = ids
        .iter()
        .map(|id| (graph.episode(*id).admission, *id))
        .collect();

    let space = graph.state_space();
    let skeleton: Vec<LinkId> = graph.system_links().collect();
    let mut present: BTreeMap<PatientId, Occupant> = BTreeMap::new();
    let mut grades: HashMap<EpisodeId, Colonization> = HashMap::new();
    let mut jumps: HashMap<EpisodeId, Vec<Jump>> = HashMap::new();
    let mut results: HashMap<LinkId, EventType> = HashMap::new();
    let mut positive_tests = 0;

    for (i, link) in skeleton.iter().copied().enumerate() {
        let e = *graph.event(link);
        let snapshot = graph.link(link).patient_state().cloned();

        if let (Some(p), Some(id)) = (e.patient, by_admission.get(&link)) {
            let patient = snapshot
                .clone()
                .unwrap_or_else(|| PatientState::new(p, space, false));
            let dist = model.admission_distribution(&patient);
            let state = rng.categorical(&dist).ok_or_else(|| {
                Error::Config(format!("admission distribution {:?} has no mass", dist))
            })?;
            let grade = status_at(space, state)?;
            grades.insert(*id, grade);
            present.insert(
                p,
                Occupant {
                    episode: *id,
                    unit: e.unit,
                    patient: PatientState { status: grade, ..patient },
                    state,
                },
            );
        } else if let Some(p) = e.patient {
            if e.kind == EventType::Discharge {
                present.remove(&p);
            } else if let (Some(o), Some(s)) = (present.get_mut(&p), snapshot.as_ref()) {
                o.patient = PatientState {
                    status: o.patient.status,
                    ..s.clone()
                };
            }
        }

        if let (Some((kind, _)), Some(p)) = (e.kind.test(), e.patient) {
            let status = match present.get(&p) {
                Some(o) => o.patient.status,
                None => snapshot.as_ref().map(|s| s.status).ok_or_else(|| {
                    Error::GraphConsistency(format!("test {} has no patient state", link))
                })?,
            };
            let positive = rng.bernoulli(model.test_likelihood(kind, true, status));
            if positive {
                positive_tests += 1;
            }
            results.insert(link, EventType::from_test(kind, positive));
        }

        if let Some(next) = skeleton.get(i + 1) {
            let end = graph.event(*next).time;
            compete(model, space, &mut present, &mut jumps, e.time, end, rng)?;
        }
    }

    let mut shifts = 0;
    let mut imported = 0;
    for id in ids.iter().copied() {
        let grade = grades.get(&id).copied().unwrap_or(Colonization::Uncolonized);
        if grade != Colonization::Uncolonized {
            imported += 1;
        }
        let drawn = jumps.remove(&id).unwrap_or_default();
        shifts += drawn.len();
        commit_episode(graph, space, id, grade, &drawn)?;
    }

    let events: Vec<Event> = graph
        .system_links()
        .map(|l| {
            let e = *graph.event(l);
            match results.get(&l) {
                Some(kind) => e.with_kind(*kind),
                None => e,
            }
        })
        .collect();

    info!(
        event = event_names::SIMULATION_FINISHED,
        stage = %Stage::Sample,
        episodes = ids.len(),
        shifts,
        imported,
        positive_tests,
        state_space = ?space,
        "simulation finished"
    );
    Ok(Simulation {
        events,
        episodes: ids.len(),
        shifts,
        imported,
        positive_tests,
    })
}

/// Gillespie steps over `[start, end)` for everyone present. Every step
/// re-reads each occupant's neighbourhood from the live unit counts.
fn compete<M, R>(
    model: &M,
    space: StateSpace,
    present: &mut BTreeMap<PatientId, Occupant>,
    jumps: &mut HashMap<EpisodeId, Vec<Jump>>,
    start: f64,
    end: f64,
    rng: &mut R,
) -> Result<()>
where
    M: Model + ?Sized,
    R: RandomSource + ?Sized,
{
    let mut t = start;
    while t < end {
        let mut exits: Vec<(PatientId, usize)> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        for (p, o) in present.iter() {
            let counts = unit_counts(present, o.unit).without(o.patient.status, o.patient.on_abx());
            let nb = Neighborhood::new(o.unit, counts);
            let q = model.rate_matrix(t, &o.patient, &nb)?;
            for to in (0..q.dim()).filter(|j| *j != o.state) {
                let rate = q.get(o.state, to);
                if rate > 0.0 {
                    exits.push((*p, to));
                    weights.push(rate);
                }
            }
        }

        let total: f64 = weights.iter().sum();
        let next = t + rng.exponential(total);
        if next >= end {
            return Ok(());
        }
        if next <= t {
            continue;
        }
        let pick = rng.categorical(&weights).ok_or_else(|| {
            Error::Inference(format!("total exit rate {} but no exits", total))
        })?;
        let (p, to) = exits[pick];
        if let Some(o) = present.get_mut(&p) {
            jumps.entry(o.episode).or_default().push((next, o.state, to));
            o.state = to;
            o.patient.status = status_at(space, to)?;
        }
        t = next;
    }
    Ok(())
}

fn unit_counts(present: &BTreeMap<PatientId, Occupant>, unit: UnitId) -> Counts {
    let mut c = Counts::default();
    for o in present.values().filter(|o| o.unit == unit) {
        c.total += 1;
        match o.patient.status {
            Colonization::Uncolonized => c.uncolonized += 1,
            Colonization::Latent => c.latent += 1,
            Colonization::Colonized => c.colonized += 1,
        }
        if o.patient.on_abx() {
            c.abx_on += 1;
        }
    }
    c
}

fn commit_episode(
    graph: &mut HistoryGraph,
    space: StateSpace,
    id: EpisodeId,
    grade: Colonization,
    jumps: &[Jump],
) -> Result<()> {
    graph.clear_proposal(id);
    let template = *graph.event(graph.episode(id).admission);
    for (time, from, to) in jumps {
        let kind = latent_kind(space, *from, *to)?;
        graph.push_proposal(
            id,
            Event {
                time: *time,
                kind,
                ..template
            },
        )?;
    }
    graph.commit_proposal(id, grade)?;

    debug!(
        event = event_names::EPISODE_RESAMPLED,
        stage = %Stage::Sample,
        episode = %id,
        grade = %grade,
        jumps = jumps.len(),
        "episode simulated"
    );
    Ok(())
}

fn latent_kind(space: StateSpace, from: usize, to: usize) -> Result<EventType> {
    let (from, to) = (status_at(space, from)?, status_at(space, to)?);
    shift_kind(space, from, to)
        .ok_or_else(|| Error::Inference(format!("no latent event moves {} to {}", from, to)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TestKind;
    use crate::model::BasicModel;
    use crate::output::{write_events, DumpMode};
    use crate::parse::parse_str;
    use crate::sampler::interior_kinds;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const WARD: &str = "\
1 1 0 1 0
1 1 1 2 0
1 1 2 1 1
1 1 3 2 4
1 1 5 1 1
1 1 6 1 3
1 1 9 2 3
";

    fn model(importation: Vec<f64>) -> BasicModel {
        BasicModel::with_defaults(StateSpace::TwoState)
            .with_acquisition(0.0, 0.0)
            .with_clearance(0.0)
            .with_importation(importation)
            .with_test(TestKind::Surveillance, 1.0, 1.0)
            .with_test(TestKind::Clinical, 1.0, 1.0)
    }

    fn run(input: &str, model: &BasicModel, seed: u64) -> (HistoryGraph, Simulation) {
        let mut g = HistoryGraph::build(parse_str(input).events, model).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let sim = simulate(&mut g, model, &mut rng).unwrap();
        (g, sim)
    }

    fn tests_of(sim: &Simulation) -> Vec<EventType> {
        sim.events
            .iter()
            .filter(|e| e.kind.test().is_some())
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn no_importation_no_transmission_all_negative() {
        let m = model(vec![1.0, 0.0]);
        let (g, sim) = run(WARD, &m, 3);
        assert_eq!(sim.episodes, 2);
        assert_eq!(sim.shifts, 0);
        assert_eq!(sim.imported, 0);
        assert_eq!(sim.positive_tests, 0);
        assert!(tests_of(&sim)
            .iter()
            .all(|k| matches!(k, EventType::NegSurvTest | EventType::NegClinTest)));
        g.verify().unwrap();
    }

    #[test]
    fn everyone_imported_tests_positive() {
        let m = model(vec![0.0, 1.0]);
        let (_, sim) = run(WARD, &m, 3);
        assert_eq!(sim.imported, 2);
        assert_eq!(sim.positive_tests, 3);
        assert!(tests_of(&sim)
            .iter()
            .all(|k| matches!(k, EventType::PosSurvTest | EventType::PosClinTest)));
    }

    #[test]
    fn acquisitions_fall_inside_stays() {
        let m = model(vec![1.0, 0.0]).with_acquisition(50.0, 0.0);
        let (g, sim) = run(WARD, &m, 11);
        assert_eq!(sim.shifts, 2);
        for id in g.episode_ids() {
            let ep = g.episode(id);
            let (a, d) = (g.event(ep.admission).time, g.event(ep.discharge).time);
            let interior = interior_kinds(&g, id);
            assert_eq!(interior.len(), 1);
            assert_eq!(interior[0].1, EventType::Acquisition);
            let t = g.event(interior[0].0).time;
            assert!(a < t && t < d);
        }
        g.verify().unwrap();
    }

    #[test]
    fn later_colonized_admission_exposes_earlier_occupant() {
        let ward = "1 1 0 1 0\n1 1 1 2 0\n1 1 10 1 3\n1 1 10 2 3\n";
        let m = model(vec![0.5, 0.5]).with_acquisition(0.0, 100.0);
        let mut exposed = 0;
        for seed in 0..200 {
            let (g, _) = run(ward, &m, seed);
            let first = g.episode_ids().find(|id| g.episode(*id).patient == PatientId(1)).unwrap();
            let second = g.episode_ids().find(|id| g.episode(*id).patient == PatientId(2)).unwrap();
            if g.admission_grade(first) != Colonization::Uncolonized
                || g.admission_grade(second) != Colonization::Colonized
            {
                continue;
            }
            exposed += 1;
            let interior = interior_kinds(&g, first);
            assert_eq!(interior.len(), 1, "seed {}", seed);
            assert_eq!(interior[0].1, EventType::Acquisition);
            let t = g.event(interior[0].0).time;
            assert!(t > 1.0 && t < 10.0, "acquired at {}", t);
        }
        assert!(exposed > 20, "only {} exposed runs", exposed);
    }

    #[test]
    fn previous_interiors_are_dropped() {
        let cheat = "1 1 0 1 0\n1 1 1 1 10\n1 1 2 1 3\n";
        let m = model(vec![1.0, 0.0]).with_cheating(true);
        let (g, sim) = run(cheat, &m, 5);
        assert_eq!(sim.shifts, 0);
        assert!(g.interior(g.episode(EpisodeId(0))).is_empty());
        assert!(!sim.events.iter().any(|e| e.kind == EventType::Acquisition));
    }

    #[test]
    fn observed_dump_keeps_every_observed_record() {
        let m = BasicModel::with_defaults(StateSpace::TwoState).with_acquisition(0.2, 0.1);
        let (_, sim) = run(WARD, &m, 8);
        let mut out = Vec::new();
        let n = write_events(&mut out, &sim.events, DumpMode::Observed).unwrap();
        assert_eq!(n, WARD.lines().count());
    }

    #[test]
    fn same_seed_same_simulation() {
        let m = BasicModel::with_defaults(StateSpace::ThreeState).with_acquisition(0.5, 0.5);
        let (_, a) = run(WARD, &m, 21);
        let (_, b) = run(WARD, &m, 21);
        assert_eq!(a, b);
    }
}
