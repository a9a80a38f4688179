//! Event records and their type codes.

use ht_common::{Colonization, FacilityId, PatientId, UnitId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Surveillance (screening) or clinical (symptom-driven) test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Surveillance,
    Clinical,
}

/// What happened. Codes are the integers of the input `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Admission,
    NegSurvTest,
    PosSurvTest,
    Discharge,
    NegClinTest,
    PosClinTest,
    AbxDose,
    AbxOn,
    AbxOff,
    Acquisition,
    Progression,
    Clearance,
    /// Admission whose colonization status has been assigned.
    AdmissionGraded(Colonization),
    /// Patient present at the start of observation with an assigned status.
    InSitu(Colonization),
    Start,
    Stop,
    Marker,
}

impl EventType {
    pub fn code(&self) -> i32 {
        match self {
            EventType::Admission => 0,
            EventType::NegSurvTest => 1,
            EventType::PosSurvTest => 2,
            EventType::Discharge => 3,
            EventType::NegClinTest => 4,
            EventType::PosClinTest => 5,
            EventType::AbxDose => 6,
            EventType::AbxOn => 7,
            EventType::AbxOff => 8,
            EventType::Acquisition => 10,
            EventType::Progression => 11,
            EventType::Clearance => 12,
            EventType::AdmissionGraded(c) => 13 + grade_offset(*c),
            EventType::InSitu(c) => 16 + grade_offset(*c),
            EventType::Start => 20,
            EventType::Stop => 21,
            EventType::Marker => 22,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let t = match code {
            0 => EventType::Admission,
            1 => EventType::NegSurvTest,
            2 => EventType::PosSurvTest,
            3 => EventType::Discharge,
            4 => EventType::NegClinTest,
            5 => EventType::PosClinTest,
            6 => EventType::AbxDose,
            7 => EventType::AbxOn,
            8 => EventType::AbxOff,
            10 => EventType::Acquisition,
            11 => EventType::Progression,
            12 => EventType::Clearance,
            13..=15 => EventType::AdmissionGraded(grade_from_offset(code - 13)?),
            16..=18 => EventType::InSitu(grade_from_offset(code - 16)?),
            20 => EventType::Start,
            21 => EventType::Stop,
            22 => EventType::Marker,
            _ => return None,
        };
        Some(t)
    }

    /// Recorded by the hospital rather than inferred or synthesized.
    pub fn is_observed(&self) -> bool {
        self.code() <= 8
    }

    pub fn is_inferred(&self) -> bool {
        (10..=18).contains(&self.code())
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, EventType::Start | EventType::Stop | EventType::Marker)
    }

    /// Opens a stay.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            EventType::Admission | EventType::AdmissionGraded(_) | EventType::InSitu(_)
        )
    }

    pub fn is_discharge(&self) -> bool {
        matches!(self, EventType::Discharge)
    }

    /// Latent status change inside an episode.
    pub fn is_shift(&self) -> bool {
        matches!(
            self,
            EventType::Acquisition | EventType::Progression | EventType::Clearance
        )
    }

    pub fn is_antibiotic(&self) -> bool {
        matches!(self, EventType::AbxDose | EventType::AbxOn | EventType::AbxOff)
    }

    /// Test kind and result, if this is a test.
    pub fn test(&self) -> Option<(TestKind, bool)> {
        match self {
            EventType::NegSurvTest => Some((TestKind::Surveillance, false)),
            EventType::PosSurvTest => Some((TestKind::Surveillance, true)),
            EventType::NegClinTest => Some((TestKind::Clinical, false)),
            EventType::PosClinTest => Some((TestKind::Clinical, true)),
            _ => None,
        }
    }

    pub fn from_test(kind: TestKind, positive: bool) -> Self {
        match (kind, positive) {
            (TestKind::Surveillance, false) => EventType::NegSurvTest,
            (TestKind::Surveillance, true) => EventType::PosSurvTest,
            (TestKind::Clinical, false) => EventType::NegClinTest,
            (TestKind::Clinical, true) => EventType::PosClinTest,
        }
    }

    /// Colonization status an admission places the patient in.
    pub fn admission_grade(&self) -> Option<Colonization> {
        match self {
            EventType::Admission => Some(Colonization::Uncolonized),
            EventType::AdmissionGraded(c) | EventType::InSitu(c) => Some(*c),
            _ => None,
        }
    }

    /// Same admission flavour with a different grade.
    pub fn regraded(&self, grade: Colonization) -> Self {
        match self {
            EventType::InSitu(_) => EventType::InSitu(grade),
            _ => EventType::AdmissionGraded(grade),
        }
    }

    /// Observable form: inferred admissions revert to plain admissions.
    pub fn observed_form(&self) -> Option<Self> {
        match self {
            EventType::AdmissionGraded(_) | EventType::InSitu(_) => Some(EventType::Admission),
            t if t.is_observed() => Some(*t),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventType::Admission => "admission",
            EventType::NegSurvTest => "negsurvtest",
            EventType::PosSurvTest => "possurvtest",
            EventType::Discharge => "discharge",
            EventType::NegClinTest => "negclintest",
            EventType::PosClinTest => "posclintest",
            EventType::AbxDose => "abxdose",
            EventType::AbxOn => "abxon",
            EventType::AbxOff => "abxoff",
            EventType::Acquisition => "acquisition",
            EventType::Progression => "progression",
            EventType::Clearance => "clearance",
            EventType::AdmissionGraded(_) => "admission_graded",
            EventType::InSitu(_) => "insitu",
            EventType::Start => "start",
            EventType::Stop => "stop",
            EventType::Marker => "marker",
        }
    }
}

fn grade_offset(c: Colonization) -> i32 {
    match c {
        Colonization::Uncolonized => 0,
        Colonization::Latent => 1,
        Colonization::Colonized => 2,
    }
}

fn grade_from_offset(offset: i32) -> Option<Colonization> {
    match offset {
        0 => Some(Colonization::Uncolonized),
        1 => Some(Colonization::Latent),
        2 => Some(Colonization::Colonized),
        _ => None,
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::AdmissionGraded(c) | EventType::InSitu(c) => {
                write!(f, "{}({})", self.name(), c)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// One record. Markers carry no patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub facility: FacilityId,
    pub unit: UnitId,
    pub time: f64,
    pub patient: Option<PatientId>,
    pub kind: EventType,
}

impl Event {
    pub fn new(
        facility: FacilityId,
        unit: UnitId,
        time: f64,
        patient: PatientId,
        kind: EventType,
    ) -> Self {
        Event {
            facility,
            unit,
            time,
            patient: Some(patient),
            kind,
        }
    }

    pub fn marker(facility: FacilityId, unit: UnitId, time: f64, kind: EventType) -> Self {
        Event {
            facility,
            unit,
            time,
            patient: None,
            kind,
        }
    }

    /// Same record with a different type.
    pub fn with_kind(&self, kind: EventType) -> Self {
        Event { kind, ..*self }
    }

    /// Patient order: patient, time, facility, unit. Markers sort after
    /// every patient.
    pub fn patient_order(&self, other: &Event) -> Ordering {
        let key = |e: &Event| (e.patient.is_none(), e.patient);
        key(self)
            .cmp(&key(other))
            .then_with(|| self.time.total_cmp(&other.time))
            .then_with(|| self.facility.cmp(&other.facility))
            .then_with(|| self.unit.cmp(&other.unit))
    }

    /// One line in the input format.
    pub fn to_record(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.facility,
            self.unit,
            self.time,
            self.patient.map(|p| p.0).unwrap_or(0),
            self.kind.code()
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patient {
            Some(p) => write!(
                f,
                "{} patient {} unit {} t={}",
                self.kind, p, self.unit, self.time
            ),
            None => write!(f, "{} unit {} t={}", self.kind, self.unit, self.time),
        }
    }
}
