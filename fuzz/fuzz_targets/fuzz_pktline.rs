//! Fuzz target for pkt-line framing.
//!
//! Arbitrary bytes must never panic the reader or move it past the input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_protocol::{parse_line, PktLineReader};

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(data);
    while let Ok(Some(line)) = reader.read() {
        assert!(reader.position() <= data.len());
        if let Some(payload) = line.data() {
            assert!(payload.len() <= tether_protocol::MAX_PKT_PAYLOAD);
        }
    }

    let _ = parse_line(data, 0);
});
