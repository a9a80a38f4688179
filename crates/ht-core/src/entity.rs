//! Patients, care units and facilities seen in the input.

use std::collections::BTreeMap;

use ht_common::{FacilityId, PatientId, UnitId};

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patient {
    pub id: PatientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub id: UnitId,
    pub facility: FacilityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facility {
    pub id: FacilityId,
    pub units: BTreeMap<UnitId, Unit>,
}

impl Facility {
    pub fn new(id: FacilityId) -> Self {
        Facility {
            id,
            units: BTreeMap::new(),
        }
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }
}

/// Every entity referenced by an event list, in id order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub facilities: BTreeMap<FacilityId, Facility>,
    pub patients: BTreeMap<PatientId, Patient>,
}

impl Registry {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut registry = Registry::default();
        for e in events {
            registry.register(e);
        }
        registry
    }

    pub fn register(&mut self, e: &Event) {
        let facility = self
            .facilities
            .entry(e.facility)
            .or_insert_with(|| Facility::new(e.facility));
        facility.units.entry(e.unit).or_insert(Unit {
            id: e.unit,
            facility: e.facility,
        });
        if let Some(p) = e.patient {
            self.patients.entry(p).or_insert(Patient { id: p });
        }
    }

    /// All units across facilities, in (facility, unit) order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.facilities.values().flat_map(|f| f.units.values())
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units().find(|u| u.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    #[test]
    fn registry_collects_entities_once() {
        let events = vec![
            Event::new(FacilityId(1), UnitId(10), 0.0, PatientId(1), EventType::Admission),
            Event::new(FacilityId(1), UnitId(11), 1.0, PatientId(2), EventType::Admission),
            Event::new(FacilityId(1), UnitId(10), 2.0, PatientId(1), EventType::Discharge),
            Event::new(FacilityId(2), UnitId(20), 0.0, PatientId(3), EventType::Admission),
        ];
        let reg = Registry::from_events(&events);
        assert_eq!(reg.facilities.len(), 2);
        assert_eq!(reg.patients.len(), 3);
        assert_eq!(reg.facilities[&FacilityId(1)].units.len(), 2);
        assert_eq!(reg.unit(UnitId(20)).map(|u| u.facility), Some(FacilityId(2)));
        let order: Vec<UnitId> = reg.units().map(|u| u.id).collect();
        assert_eq!(order, vec![UnitId(10), UnitId(11), UnitId(20)]);
    }
}
