#![no_main]

use libfuzzer_sys::fuzz_target;
use retrace::trace_normalizer::normalize;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Neither format may panic on arbitrary payloads
        let _ = normalize(input, "1.4.0");
        let _ = normalize(input, "1.3.0");
    }
});
