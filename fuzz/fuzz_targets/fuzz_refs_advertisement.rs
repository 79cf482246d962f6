//! Fuzz target for refs discovery parsing, smart and dumb.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_protocol::{parse_dumb_refs, parse_smart_refs};

fuzz_target!(|data: &[u8]| {
    if let Ok(adv) = parse_smart_refs(data) {
        let width = adv.format.raw_len();
        assert!(adv.iter().all(|r| r.oid.as_bytes().len() == width));
    }
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_dumb_refs(text);
    }
});
