//! Event-history graph.
//!
//! Every event is one [`HistoryLink`] in an arena. A link sits in up to five
//! doubly linked chains: the system chain (all events), its facility chain,
//! its unit chain, its patient chain, and the episode chain that strings
//! together the inferred events of one stay. Each link owns a snapshot of
//! every tracked scope's state immediately after its event; a snapshot is
//! always the previous snapshot in the same chain with the event applied.

use std::collections::{BTreeMap, HashMap};

use ht_common::{Error, FacilityId, PatientId, Result, StateSpace, UnitId};
use tracing::{info, warn};

use crate::entity::Registry;
use crate::episode::{Episode, EpisodeId};
use crate::event::{Event, EventType};
use crate::logging::{event_names, Stage};
use crate::model::Model;
use crate::parse::Diagnostic;
use crate::state::{Owner, PatientState, State};

/// Index of a link in the arena. Stable for the life of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub(crate) usize);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scope whose state a link may snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    System,
    Facility,
    Unit,
    Patient,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::System, Scope::Facility, Scope::Unit, Scope::Patient];
    pub const LOCATIONS: [Scope; 3] = [Scope::System, Scope::Facility, Scope::Unit];

    fn index(self) -> usize {
        match self {
            Scope::System => 0,
            Scope::Facility => 1,
            Scope::Unit => 2,
            Scope::Patient => 3,
        }
    }

    /// Owner of this scope's state for an event, if the event is in scope.
    pub fn owner_of(self, e: &Event) -> Option<Owner> {
        match self {
            Scope::System => Some(Owner::System),
            Scope::Facility => Some(Owner::Facility(e.facility)),
            Scope::Unit => Some(Owner::Unit(e.unit)),
            Scope::Patient => e.patient.map(Owner::Patient),
        }
    }
}

/// The five orderings a link takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    System,
    Facility,
    Unit,
    Patient,
    Episode,
}

impl Chain {
    pub(crate) fn index(self) -> usize {
        match self {
            Chain::System => 0,
            Chain::Facility => 1,
            Chain::Unit => 2,
            Chain::Patient => 3,
            Chain::Episode => 4,
        }
    }
}

impl From<Scope> for Chain {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::System => Chain::System,
            Scope::Facility => Chain::Facility,
            Scope::Unit => Chain::Unit,
            Scope::Patient => Chain::Patient,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Neighbors {
    pub(crate) prev: Option<LinkId>,
    pub(crate) next: Option<LinkId>,
}

#[derive(Debug, Clone)]
pub struct HistoryLink {
    pub(crate) event: Event,
    pub(crate) chains: [Neighbors; 5],
    pub(crate) states: [Option<State>; 4],
    /// Spliced into the scope chains (false for proposal links).
    pub(crate) linked: bool,
}

impl HistoryLink {
    fn new(event: Event) -> Self {
        HistoryLink {
            event,
            chains: [Neighbors::default(); 5],
            states: [None, None, None, None],
            linked: false,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn state(&self, scope: Scope) -> Option<&State> {
        self.states[scope.index()].as_ref()
    }

    pub fn patient_state(&self) -> Option<&PatientState> {
        self.state(Scope::Patient).and_then(State::as_patient)
    }
}

/// Counts of what build did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub events: usize,
    pub dropped: usize,
    pub repairs: usize,
    pub episodes: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryGraph {
    pub(crate) links: Vec<HistoryLink>,
    free: Vec<LinkId>,
    system_head: Option<LinkId>,
    facility_heads: BTreeMap<FacilityId, LinkId>,
    unit_heads: BTreeMap<UnitId, LinkId>,
    patient_heads: BTreeMap<PatientId, LinkId>,
    /// Fresh state per owner, the value before any event.
    templates: HashMap<Owner, State>,
    pub(crate) episodes: Vec<Episode>,
    registry: Registry,
    space: StateSpace,
    start: f64,
    end: f64,
    diagnostics: Vec<Diagnostic>,
    summary: BuildSummary,
}

impl HistoryGraph {
    /// Build the graph from events in any order.
    ///
    /// Events the model does not need are dropped. Stays are repaired so
    /// that every patient event lies inside an admission..discharge pair,
    /// and each repair becomes a diagnostic. A start and stop marker is
    /// added for every unit at the global first and last event time.
    pub fn build<M: Model + ?Sized>(events: Vec<Event>, model: &M) -> Result<Self> {
        let input_len = events.len();
        let mut diagnostics = Vec::new();

        let kept = filter_events(events, model);
        let dropped = input_len - kept.len();
        if kept.iter().all(|e| e.patient.is_none()) {
            return Err(Error::EmptyInput {
                diagnostics: dropped,
            });
        }

        let start = kept.iter().map(|e| e.time).fold(f64::INFINITY, f64::min);
        let end = kept.iter().map(|e| e.time).fold(f64::NEG_INFINITY, f64::max);

        let (mut ordered, repairs) = repair_stays(kept, end, &mut diagnostics);
        for d in &diagnostics {
            warn!(
                event = event_names::EPISODE_REPAIRED,
                stage = %Stage::Build,
                "{}",
                d.message
            );
        }

        let registry = Registry::from_events(&ordered);
        for unit in registry.units() {
            ordered.push(Event::marker(unit.facility, unit.id, start, EventType::Start));
            ordered.push(Event::marker(unit.facility, unit.id, end, EventType::Stop));
        }
        // stable: keeps patient order within equal times
        ordered.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| marker_rank(a).cmp(&marker_rank(b)))
        });

        let mut graph = HistoryGraph {
            links: Vec::with_capacity(ordered.len()),
            free: Vec::new(),
            system_head: None,
            facility_heads: BTreeMap::new(),
            unit_heads: BTreeMap::new(),
            patient_heads: BTreeMap::new(),
            templates: HashMap::new(),
            episodes: Vec::new(),
            registry,
            space: model.state_space(),
            start,
            end,
            diagnostics,
            summary: BuildSummary::default(),
        };
        graph.make_templates(model);
        graph.thread(ordered)?;

        graph.summary = BuildSummary {
            events: graph.links.len(),
            dropped,
            repairs,
            episodes: graph.episodes.len(),
        };
        info!(
            event = event_names::BUILD_FINISHED,
            stage = %Stage::Build,
            links = graph.summary.events,
            episodes = graph.summary.episodes,
            repairs,
            dropped,
            "history graph built"
        );
        Ok(graph)
    }

    fn make_templates<M: Model + ?Sized>(&mut self, model: &M) {
        if let Some(s) = model.make_system_state() {
            self.templates.insert(Owner::System, s);
        }
        for facility in self.registry.facilities.values() {
            if let Some(s) = model.make_facility_state(facility.id) {
                self.templates.insert(Owner::Facility(facility.id), s);
            }
            for unit in facility.units.values() {
                if let Some(s) = model.make_unit_state(unit.id) {
                    self.templates.insert(Owner::Unit(unit.id), s);
                }
            }
        }
        for patient in self.registry.patients.keys() {
            if let Some(s) = model.make_patient_state(*patient) {
                self.templates.insert(Owner::Patient(*patient), s);
            }
        }
    }

    /// Thread ordered events into the chains, computing every snapshot and
    /// collecting episodes.
    fn thread(&mut self, ordered: Vec<Event>) -> Result<()> {
        let mut system_tail: Option<LinkId> = None;
        let mut facility_tails: BTreeMap<FacilityId, LinkId> = BTreeMap::new();
        let mut unit_tails: BTreeMap<UnitId, LinkId> = BTreeMap::new();
        let mut patient_tails: BTreeMap<PatientId, LinkId> = BTreeMap::new();
        let mut open: BTreeMap<PatientId, Episode> = BTreeMap::new();

        for event in ordered {
            let id = self.alloc(event);
            self.links[id.0].linked = true;

            let tails = [
                system_tail,
                facility_tails.get(&event.facility).copied(),
                unit_tails.get(&event.unit).copied(),
                event.patient.and_then(|p| patient_tails.get(&p).copied()),
            ];
            for scope in Scope::ALL {
                if scope == Scope::Patient && event.patient.is_none() {
                    continue;
                }
                let chain = Chain::from(scope);
                match tails[scope.index()] {
                    Some(tail) => self.connect(tail, id, chain),
                    None => self.set_head(scope, &event, id),
                }
            }
            system_tail = Some(id);
            facility_tails.insert(event.facility, id);
            unit_tails.insert(event.unit, id);
            if let Some(p) = event.patient {
                patient_tails.insert(p, id);
            }

            self.recompute(id)?;

            if let Some(p) = event.patient {
                if event.kind.is_admission() {
                    open.insert(p, Episode::new(p, id, id));
                } else if event.kind.is_shift() {
                    if let Some(ep) = open.get_mut(&p) {
                        ep.push_current(&mut self.links, id);
                    }
                } else if event.kind.is_discharge() {
                    if let Some(mut ep) = open.remove(&p) {
                        ep.discharge = id;
                        self.episodes.push(ep);
                    }
                }
            }
        }

        if let Some(p) = open.keys().next() {
            return Err(Error::GraphConsistency(format!(
                "stay of patient {} left open after repair",
                p
            )));
        }
        Ok(())
    }

    /// Recompute every snapshot of `id` from its chain predecessors.
    fn recompute(&mut self, id: LinkId) -> Result<()> {
        let event = self.links[id.0].event;
        let before = self.patient_before(id).cloned();
        for scope in Scope::ALL {
            let Some(owner) = scope.owner_of(&event) else {
                continue;
            };
            let Some(template) = self.templates.get(&owner) else {
                continue;
            };
            let prev = self.links[id.0].chains[Chain::from(scope).index()].prev;
            let mut state = template.clone();
            if let Some(p) = prev.and_then(|p| self.links[p.0].states[scope.index()].as_ref()) {
                state.copy_from(p);
            }
            state.check_owner(&event)?;
            state.apply(&event, before.as_ref());
            self.links[id.0].states[scope.index()] = Some(state);
        }
        Ok(())
    }

    /// Recompute every snapshot by one walk along the system chain.
    pub fn set_copy_apply(&mut self) -> Result<()> {
        let mut cursor = self.system_head;
        while let Some(id) = cursor {
            self.recompute(id)?;
            cursor = self.next(id, Chain::System);
        }
        Ok(())
    }

    pub(crate) fn alloc(&mut self, event: Event) -> LinkId {
        match self.free.pop() {
            Some(id) => {
                self.links[id.0] = HistoryLink::new(event);
                id
            }
            None => {
                self.links.push(HistoryLink::new(event));
                LinkId(self.links.len() - 1)
            }
        }
    }

    /// Return an unlinked link to the arena.
    pub(crate) fn release(&mut self, id: LinkId) {
        debug_assert!(!self.links[id.0].linked, "released a linked link {}", id);
        self.links[id.0].states = [None, None, None, None];
        self.free.push(id);
    }

    fn set_head(&mut self, scope: Scope, e: &Event, id: LinkId) {
        match scope {
            Scope::System => self.system_head = Some(id),
            Scope::Facility => {
                self.facility_heads.insert(e.facility, id);
            }
            Scope::Unit => {
                self.unit_heads.insert(e.unit, id);
            }
            Scope::Patient => {
                if let Some(p) = e.patient {
                    self.patient_heads.insert(p, id);
                }
            }
        }
    }

    /// Make `b` follow `a` in `chain`, where `b` is not yet in it.
    pub(crate) fn connect(&mut self, a: LinkId, b: LinkId, chain: Chain) {
        let c = chain.index();
        self.links[a.0].chains[c].next = Some(b);
        self.links[b.0].chains[c].prev = Some(a);
    }

    /// Insert `id` directly after `after` in `chain`.
    pub(crate) fn insert_after(&mut self, after: LinkId, id: LinkId, chain: Chain) {
        let c = chain.index();
        let next = self.links[after.0].chains[c].next;
        self.links[id.0].chains[c] = Neighbors {
            prev: Some(after),
            next,
        };
        self.links[after.0].chains[c].next = Some(id);
        if let Some(n) = next {
            self.links[n.0].chains[c].prev = Some(id);
        }
    }

    /// Take `id` out of `chain`, joining its neighbours. Chain heads are
    /// never removed this way: inferred links always follow an admission.
    pub(crate) fn unlink(&mut self, id: LinkId, chain: Chain) {
        let c = chain.index();
        let Neighbors { prev, next } = self.links[id.0].chains[c];
        if let Some(p) = prev {
            self.links[p.0].chains[c].next = next;
        }
        if let Some(n) = next {
            self.links[n.0].chains[c].prev = prev;
        }
        self.links[id.0].chains[c] = Neighbors::default();
    }

    pub fn link(&self, id: LinkId) -> &HistoryLink {
        &self.links[id.0]
    }

    pub fn event(&self, id: LinkId) -> &Event {
        &self.links[id.0].event
    }

    pub(crate) fn event_mut(&mut self, id: LinkId) -> &mut Event {
        &mut self.links[id.0].event
    }

    pub(crate) fn state_mut(&mut self, id: LinkId, scope: Scope) -> Option<&mut State> {
        self.links[id.0].states[scope.index()].as_mut()
    }

    pub(crate) fn set_state(&mut self, id: LinkId, scope: Scope, state: Option<State>) {
        self.links[id.0].states[scope.index()] = state;
    }

    pub fn state(&self, id: LinkId, scope: Scope) -> Option<&State> {
        self.links[id.0].state(scope)
    }

    /// Scope state just before `id`'s event: the predecessor's snapshot.
    pub fn state_before(&self, id: LinkId, scope: Scope) -> Option<&State> {
        self.prev(id, scope.into())
            .and_then(|p| self.state(p, scope))
            .or_else(|| {
                let owner = scope.owner_of(self.event(id))?;
                self.templates.get(&owner)
            })
    }

    /// The event's patient state just before the event.
    pub fn patient_before(&self, id: LinkId) -> Option<&PatientState> {
        self.state_before(id, Scope::Patient).and_then(State::as_patient)
    }

    pub fn next(&self, id: LinkId, chain: Chain) -> Option<LinkId> {
        self.links[id.0].chains[chain.index()].next
    }

    pub fn prev(&self, id: LinkId, chain: Chain) -> Option<LinkId> {
        self.links[id.0].chains[chain.index()].prev
    }

    pub fn system_head(&self) -> Option<LinkId> {
        self.system_head
    }

    pub fn facility_head(&self, facility: FacilityId) -> Option<LinkId> {
        self.facility_heads.get(&facility).copied()
    }

    pub fn unit_head(&self, unit: UnitId) -> Option<LinkId> {
        self.unit_heads.get(&unit).copied()
    }

    pub fn patient_head(&self, patient: PatientId) -> Option<LinkId> {
        self.patient_heads.get(&patient).copied()
    }

    /// Walk a chain forward from `from` (inclusive).
    pub fn iter_from(&self, from: Option<LinkId>, chain: Chain) -> ChainIter<'_> {
        ChainIter {
            graph: self,
            cursor: from,
            chain,
        }
    }

    /// All links in system order.
    pub fn system_links(&self) -> ChainIter<'_> {
        self.iter_from(self.system_head, Chain::System)
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.unit_heads.keys().copied()
    }

    pub fn facility_ids(&self) -> impl Iterator<Item = FacilityId> + '_ {
        self.facility_heads.keys().copied()
    }

    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.patient_heads.keys().copied()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn episode(&self, id: EpisodeId) -> &Episode {
        &self.episodes[id.0]
    }

    pub fn episode_ids(&self) -> impl Iterator<Item = EpisodeId> {
        (0..self.episodes.len()).map(EpisodeId)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state_space(&self) -> StateSpace {
        self.space
    }

    /// First and last event time.
    pub fn span(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn summary(&self) -> BuildSummary {
        self.summary
    }

    /// Check chain ordering and snapshot consistency against a fresh
    /// recomputation. Used by tests and debug tooling.
    pub fn verify(&self) -> Result<()> {
        let mut fresh = self.clone();
        fresh.set_copy_apply()?;
        for id in self.system_links() {
            for scope in Scope::ALL {
                if self.state(id, scope) != fresh.state(id, scope) {
                    return Err(Error::GraphConsistency(format!(
                        "{:?} snapshot at {} ({}) differs from recomputation",
                        scope,
                        id,
                        self.event(id)
                    )));
                }
                let chain = Chain::from(scope);
                if let Some(n) = self.next(id, chain) {
                    if self.event(n).time < self.event(id).time {
                        return Err(Error::GraphConsistency(format!(
                            "{:?} chain goes back in time after {}",
                            chain,
                            self.event(id)
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct ChainIter<'a> {
    graph: &'a HistoryGraph,
    cursor: Option<LinkId>,
    chain: Chain,
}

impl Iterator for ChainIter<'_> {
    type Item = LinkId;

    fn next(&mut self) -> Option<LinkId> {
        let id = self.cursor?;
        self.cursor = self.graph.next(id, self.chain);
        Some(id)
    }
}

fn marker_rank(e: &Event) -> u8 {
    match e.kind {
        EventType::Start => 0,
        EventType::Stop => 2,
        _ => 1,
    }
}

/// Drop what the model does not need. Admissions and discharges always
/// stay; graded admissions the model does not want become plain ones.
fn filter_events<M: Model + ?Sized>(events: Vec<Event>, model: &M) -> Vec<Event> {
    events
        .into_iter()
        .filter_map(|e| {
            if model.need_event_type(e.kind) {
                return Some(e);
            }
            if e.kind.is_admission() {
                return Some(e.with_kind(EventType::Admission));
            }
            if e.kind.is_discharge() {
                return Some(e);
            }
            None
        })
        .collect()
}

/// Sort by patient order and close every stay, returning patient events
/// followed by free-standing markers, and the number of repairs.
fn repair_stays(
    mut events: Vec<Event>,
    end: f64,
    diagnostics: &mut Vec<Diagnostic>,
) -> (Vec<Event>, usize) {
    events.sort_by(|a, b| a.patient_order(b));
    let before = diagnostics.len();
    let mut out = Vec::with_capacity(events.len());
    let mut open: Option<Event> = None;
    let mut current: Option<PatientId> = None;

    let close = |open: &mut Option<Event>, at: f64, out: &mut Vec<Event>| {
        if let Some(adm) = open.take() {
            out.push(Event {
                time: at,
                kind: EventType::Discharge,
                ..adm
            });
        }
    };

    for e in events {
        if e.patient != current {
            if let Some(adm) = open {
                diagnostics.push(Diagnostic::new(
                    0,
                    format!("patient {} still admitted at end; discharged at {}", fmt_patient(&adm), end),
                ));
            }
            close(&mut open, end, &mut out);
            current = e.patient;
        }
        let Some(_) = e.patient else {
            out.push(e);
            continue;
        };

        if e.kind.is_admission() {
            if let Some(adm) = open {
                diagnostics.push(Diagnostic::new(
                    0,
                    format!(
                        "patient {} admitted to unit {} at {} while in unit {}; discharge added",
                        fmt_patient(&e),
                        e.unit,
                        e.time,
                        adm.unit
                    ),
                ));
            }
            close(&mut open, e.time, &mut out);
            open = Some(e);
            out.push(e);
        } else if e.kind.is_discharge() {
            match open {
                Some(adm) => {
                    if adm.unit != e.unit {
                        diagnostics.push(Diagnostic::new(
                            0,
                            format!(
                                "patient {} discharged from unit {} at {} while in unit {}",
                                fmt_patient(&e),
                                e.unit,
                                e.time,
                                adm.unit
                            ),
                        ));
                    }
                    close(&mut open, e.time, &mut out);
                }
                None => diagnostics.push(Diagnostic::new(
                    0,
                    format!(
                        "patient {} discharged at {} without a stay; dropped",
                        fmt_patient(&e),
                        e.time
                    ),
                )),
            }
        } else {
            let moved = open.is_some_and(|adm| adm.unit != e.unit);
            if open.is_none() || moved {
                diagnostics.push(Diagnostic::new(
                    0,
                    format!(
                        "patient {} has {} in unit {} at {} outside a stay there; admission added",
                        fmt_patient(&e),
                        e.kind,
                        e.unit,
                        e.time
                    ),
                ));
                close(&mut open, e.time, &mut out);
                let adm = e.with_kind(EventType::Admission);
                open = Some(adm);
                out.push(adm);
            }
            out.push(e);
        }
    }
    if let Some(adm) = open {
        diagnostics.push(Diagnostic::new(
            0,
            format!("patient {} still admitted at end; discharged at {}", fmt_patient(&adm), end),
        ));
    }
    close(&mut open, end, &mut out);

    let repairs = diagnostics.len() - before;
    (out, repairs)
}

fn fmt_patient(e: &Event) -> String {
    e.patient.map(|p| p.to_string()).unwrap_or_default()
}
