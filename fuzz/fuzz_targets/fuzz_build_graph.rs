//! Fuzz target for history graph construction.
//!
//! Structured records go through stay repair and chain threading; a built
//! graph must agree with its own recomputation.

#![no_main]

use arbitrary::Arbitrary;
use ht_common::{FacilityId, PatientId, StateSpace, UnitId};
use ht_core::{BasicModel, Event, EventType, HistoryGraph};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Record {
    unit: u8,
    time: u16,
    patient: u8,
    code: u8,
}

fuzz_target!(|records: Vec<Record>| {
    let events: Vec<Event> = records
        .iter()
        .filter_map(|r| {
            let kind = EventType::from_code(i32::from(r.code % 10))?;
            if kind.is_marker() {
                return None;
            }
            Some(Event::new(
                FacilityId(1),
                UnitId(i64::from(r.unit % 4)),
                f64::from(r.time) / 4.0,
                PatientId(i64::from(r.patient % 8) + 1),
                kind,
            ))
        })
        .collect();
    let model = BasicModel::with_defaults(StateSpace::TwoState);
    if let Ok(graph) = HistoryGraph::build(events, &model) {
        assert!(graph.verify().is_ok());
    }
});
