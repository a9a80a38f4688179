//! Fuzz target for priors JSON parsing and validation.

#![no_main]

use ht_config::{validate_priors, Priors, RunSettings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(priors) = serde_json::from_slice::<Priors>(data) {
        let _ = validate_priors(&priors, &RunSettings::default());
    }
});
