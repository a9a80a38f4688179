//! Per-scope state that absorbs event effects incrementally.
//!
//! Every operation takes `before`, the state of the event's patient
//! immediately before the event (None for markers, or when the model keeps
//! no patient state). Location scopes need it to know which class a
//! discharging patient leaves; patient scopes need it to undo an admission.
//! With the same `before`, `unapply(apply(s, e), e) == s`.

use std::collections::BTreeSet;

use ht_common::{Colonization, Error, FacilityId, PatientId, Result, StateSpace, UnitId};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventType};

/// Which scope a state object describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    System,
    Facility(FacilityId),
    Unit(UnitId),
    Patient(PatientId),
}

impl Owner {
    /// Whether `e` falls inside this scope.
    pub fn covers(&self, e: &Event) -> bool {
        match self {
            Owner::System => true,
            Owner::Facility(f) => e.facility == *f,
            Owner::Unit(u) => e.unit == *u,
            Owner::Patient(p) => e.patient == Some(*p),
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::System => write!(f, "system"),
            Owner::Facility(id) => write!(f, "facility {}", id),
            Owner::Unit(id) => write!(f, "unit {}", id),
            Owner::Patient(id) => write!(f, "patient {}", id),
        }
    }
}

/// Occupancy summary of a location, whatever its representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: i64,
    pub uncolonized: i64,
    pub latent: i64,
    pub colonized: i64,
    /// Occupants currently on antibiotics.
    pub abx_on: i64,
}

impl Counts {
    pub fn of(&self, status: Colonization) -> i64 {
        match status {
            Colonization::Uncolonized => self.uncolonized,
            Colonization::Latent => self.latent,
            Colonization::Colonized => self.colonized,
        }
    }

    fn slot(&mut self, status: Colonization) -> &mut i64 {
        match status {
            Colonization::Uncolonized => &mut self.uncolonized,
            Colonization::Latent => &mut self.latent,
            Colonization::Colonized => &mut self.colonized,
        }
    }

    /// Counts with one patient of `status` taken out.
    pub fn without(&self, status: Colonization, on_abx: bool) -> Counts {
        let mut c = *self;
        c.total -= 1;
        *c.slot(status) -= 1;
        if on_abx {
            c.abx_on -= 1;
        }
        c
    }
}

/// Location state as class counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCounts {
    pub owner: Owner,
    pub space: StateSpace,
    pub counts: Counts,
}

/// Location state as explicit patient sets per class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSets {
    pub owner: Owner,
    pub space: StateSpace,
    pub uncolonized: BTreeSet<PatientId>,
    pub latent: BTreeSet<PatientId>,
    pub colonized: BTreeSet<PatientId>,
    pub abx_on: BTreeSet<PatientId>,
}

/// Antibiotic exposure counters of one patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbxState {
    /// Open antibiotic courses (on minus off).
    pub on: i32,
    pub doses: u32,
    /// Courses and doses ever started.
    pub exposures: u32,
}

impl AbxState {
    pub fn is_on(&self) -> bool {
        self.on > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientState {
    pub owner: PatientId,
    /// Unit currently occupied, None between stays.
    pub unit: Option<UnitId>,
    pub status: Colonization,
    pub space: StateSpace,
    /// Present only when the model tracks antibiotics.
    pub abx: Option<AbxState>,
}

impl PatientState {
    pub fn new(owner: PatientId, space: StateSpace, track_abx: bool) -> Self {
        PatientState {
            owner,
            unit: None,
            status: Colonization::Uncolonized,
            space,
            abx: track_abx.then(AbxState::default),
        }
    }

    pub fn on_abx(&self) -> bool {
        self.abx.is_some_and(|a| a.is_on())
    }
}

/// A snapshot held by a history link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Counts(LocationCounts),
    Sets(LocationSets),
    Patient(PatientState),
}

/// Status before and after a latent shift.
pub fn shift_endpoints(kind: EventType, space: StateSpace) -> Option<(Colonization, Colonization)> {
    match kind {
        EventType::Acquisition => Some((Colonization::Uncolonized, space.acquired())),
        EventType::Progression => Some((Colonization::Latent, Colonization::Colonized)),
        EventType::Clearance => Some((Colonization::Colonized, Colonization::Uncolonized)),
        _ => None,
    }
}

impl State {
    pub fn counts_for(owner: Owner, space: StateSpace) -> Self {
        State::Counts(LocationCounts {
            owner,
            space,
            counts: Counts::default(),
        })
    }

    pub fn sets_for(owner: Owner, space: StateSpace) -> Self {
        State::Sets(LocationSets {
            owner,
            space,
            uncolonized: BTreeSet::new(),
            latent: BTreeSet::new(),
            colonized: BTreeSet::new(),
            abx_on: BTreeSet::new(),
        })
    }

    pub fn owner(&self) -> Owner {
        match self {
            State::Counts(s) => s.owner,
            State::Sets(s) => s.owner,
            State::Patient(s) => Owner::Patient(s.owner),
        }
    }

    pub fn as_patient(&self) -> Option<&PatientState> {
        match self {
            State::Patient(p) => Some(p),
            _ => None,
        }
    }

    /// Occupancy summary; None for patient states.
    pub fn counts(&self) -> Option<Counts> {
        match self {
            State::Counts(s) => Some(s.counts),
            State::Sets(s) => {
                let uncolonized = s.uncolonized.len() as i64;
                let latent = s.latent.len() as i64;
                let colonized = s.colonized.len() as i64;
                Some(Counts {
                    total: uncolonized + latent + colonized,
                    uncolonized,
                    latent,
                    colonized,
                    abx_on: s.abx_on.len() as i64,
                })
            }
            State::Patient(_) => None,
        }
    }

    /// Overwrite with the value of `other`, keeping this state's owner.
    pub fn copy_from(&mut self, other: &State) {
        let owner = self.owner();
        *self = other.clone();
        match self {
            State::Counts(s) => s.owner = owner,
            State::Sets(s) => s.owner = owner,
            State::Patient(s) => {
                if let Owner::Patient(p) = owner {
                    s.owner = p;
                }
            }
        }
    }

    /// Move `patient` from class `from` to class `to` without an event.
    /// Used when an admission is re-graded after the fact.
    pub fn reclassify(&mut self, patient: PatientId, from: Colonization, to: Colonization) {
        match self {
            State::Counts(s) => {
                *s.counts.slot(from) -= 1;
                *s.counts.slot(to) += 1;
            }
            State::Sets(s) => {
                if s.set(from).remove(&patient) {
                    s.set(to).insert(patient);
                }
            }
            State::Patient(s) => {
                debug_assert_eq!(s.status, from, "reclassified patient {}", patient);
                s.status = to;
            }
        }
    }

    /// Typed owner check for callers that return `Result`.
    pub fn check_owner(&self, e: &Event) -> Result<()> {
        let owner = self.owner();
        if owner.covers(e) {
            Ok(())
        } else {
            Err(Error::OwnerMismatch {
                expected: owner.to_string(),
                actual: e.to_string(),
            })
        }
    }

    pub fn apply(&mut self, e: &Event, before: Option<&PatientState>) {
        debug_assert!(
            self.owner().covers(e),
            "{} state applied to {}",
            self.owner(),
            e
        );
        match self {
            State::Counts(s) => s.step(e, before, 1),
            State::Sets(s) => s.step(e, before, true),
            State::Patient(s) => s.apply(e),
        }
    }

    pub fn unapply(&mut self, e: &Event, before: Option<&PatientState>) {
        debug_assert!(
            self.owner().covers(e),
            "{} state unapplied from {}",
            self.owner(),
            e
        );
        match self {
            State::Counts(s) => s.step(e, before, -1),
            State::Sets(s) => s.step(e, before, false),
            State::Patient(s) => s.unapply(e, before),
        }
    }
}

impl LocationCounts {
    /// Apply (`sign = 1`) or undo (`sign = -1`) an event.
    fn step(&mut self, e: &Event, before: Option<&PatientState>, sign: i64) {
        let space = self.space;
        let c = &mut self.counts;
        let status = before.map(|p| p.status).unwrap_or(Colonization::Uncolonized);
        let on_abx = before.is_some_and(|p| p.on_abx());
        let abx_open = before.and_then(|p| p.abx).map(|a| a.on).unwrap_or(0);

        match e.kind {
            k if k.is_admission() => {
                let grade = k.admission_grade().unwrap_or(Colonization::Uncolonized);
                c.total += sign;
                *c.slot(grade) += sign;
                if on_abx {
                    c.abx_on += sign;
                }
            }
            EventType::Discharge => {
                c.total -= sign;
                *c.slot(status) -= sign;
                if on_abx {
                    c.abx_on -= sign;
                }
            }
            EventType::Acquisition | EventType::Progression | EventType::Clearance => {
                if let Some((from, to)) = shift_endpoints(e.kind, space) {
                    *c.slot(from) -= sign;
                    *c.slot(to) += sign;
                }
            }
            EventType::AbxOn if abx_open == 0 => c.abx_on += sign,
            EventType::AbxOff if abx_open == 1 => c.abx_on -= sign,
            _ => {}
        }
    }
}

impl LocationSets {
    fn set(&mut self, status: Colonization) -> &mut BTreeSet<PatientId> {
        match status {
            Colonization::Uncolonized => &mut self.uncolonized,
            Colonization::Latent => &mut self.latent,
            Colonization::Colonized => &mut self.colonized,
        }
    }

    fn find(&self, p: PatientId) -> Option<Colonization> {
        if self.uncolonized.contains(&p) {
            Some(Colonization::Uncolonized)
        } else if self.latent.contains(&p) {
            Some(Colonization::Latent)
        } else if self.colonized.contains(&p) {
            Some(Colonization::Colonized)
        } else {
            None
        }
    }

    fn step(&mut self, e: &Event, before: Option<&PatientState>, forward: bool) {
        let Some(p) = e.patient else {
            return;
        };
        let on_abx = before.is_some_and(|b| b.on_abx());
        let abx_open = before.and_then(|b| b.abx).map(|a| a.on).unwrap_or(0);

        // enter/leave are mirror images; undo swaps them
        let (enters, leaves) = match e.kind {
            k if k.is_admission() => (forward, !forward),
            EventType::Discharge => (!forward, forward),
            _ => (false, false),
        };
        if leaves {
            if let Some(status) = self.find(p) {
                self.set(status).remove(&p);
            }
            self.abx_on.remove(&p);
            return;
        }
        if enters {
            let status = if e.kind.is_discharge() {
                before.map(|b| b.status).unwrap_or(Colonization::Uncolonized)
            } else {
                e.kind.admission_grade().unwrap_or(Colonization::Uncolonized)
            };
            self.set(status).insert(p);
            if on_abx {
                self.abx_on.insert(p);
            }
            return;
        }

        if let Some((from, to)) = shift_endpoints(e.kind, self.space) {
            let (from, to) = if forward { (from, to) } else { (to, from) };
            if self.set(from).remove(&p) {
                self.set(to).insert(p);
            }
            return;
        }

        match (e.kind, forward) {
            (EventType::AbxOn, true) if abx_open == 0 => {
                self.abx_on.insert(p);
            }
            (EventType::AbxOn, false) if abx_open == 0 => {
                self.abx_on.remove(&p);
            }
            (EventType::AbxOff, true) if abx_open == 1 => {
                self.abx_on.remove(&p);
            }
            (EventType::AbxOff, false) if abx_open == 1 => {
                self.abx_on.insert(p);
            }
            _ => {}
        }
    }
}

impl PatientState {
    fn apply(&mut self, e: &Event) {
        match e.kind {
            k if k.is_admission() => {
                self.unit = Some(e.unit);
                self.status = k.admission_grade().unwrap_or(Colonization::Uncolonized);
            }
            EventType::Discharge => self.unit = None,
            k if k.is_shift() => {
                if let Some((from, to)) = shift_endpoints(k, self.space) {
                    debug_assert_eq!(self.status, from, "{} from wrong status", e);
                    self.status = to;
                }
            }
            EventType::AbxOn => {
                if let Some(a) = &mut self.abx {
                    a.on += 1;
                    a.exposures += 1;
                }
            }
            EventType::AbxOff => {
                if let Some(a) = &mut self.abx {
                    a.on -= 1;
                }
            }
            EventType::AbxDose => {
                if let Some(a) = &mut self.abx {
                    a.doses += 1;
                    a.exposures += 1;
                }
            }
            _ => {}
        }
    }

    fn unapply(&mut self, e: &Event, before: Option<&PatientState>) {
        match e.kind {
            k if k.is_admission() => {
                let (unit, status) = before
                    .map(|b| (b.unit, b.status))
                    .unwrap_or((None, Colonization::Uncolonized));
                self.unit = unit;
                self.status = status;
            }
            EventType::Discharge => self.unit = Some(e.unit),
            k if k.is_shift() => {
                if let Some((from, to)) = shift_endpoints(k, self.space) {
                    debug_assert_eq!(self.status, to, "undo {} from wrong status", e);
                    self.status = from;
                }
            }
            EventType::AbxOn => {
                if let Some(a) = &mut self.abx {
                    a.on -= 1;
                    a.exposures -= 1;
                }
            }
            EventType::AbxOff => {
                if let Some(a) = &mut self.abx {
                    a.on += 1;
                }
            }
            EventType::AbxDose => {
                if let Some(a) = &mut self.abx {
                    a.doses -= 1;
                    a.exposures -= 1;
                }
            }
            _ => {}
        }
    }
}
