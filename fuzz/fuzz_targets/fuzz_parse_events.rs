//! Fuzz target for event record parsing.
//!
//! Arbitrary bytes must only ever produce events or diagnostics.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(out) = ht_core::parse_events(data) {
        for e in &out.events {
            assert!(e.time.is_finite());
        }
        for d in &out.diagnostics {
            assert!(d.line > 0);
        }
    }
});
