#![no_main]

use libfuzzer_sys::fuzz_target;

// Arbitrary fixture documents must parse, build and evaluate without panicking.
fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        let _ = ph_conformance::run_case_json(body);
    }
});
