//! Fuzz target for side-band demultiplexing and the response parsers
//! built on it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_protocol::{demux_bytes, parse_report_status, parse_upload_pack_response};

fuzz_target!(|data: &[u8]| {
    let _ = demux_bytes(data);
    for sideband in [false, true] {
        let _ = parse_upload_pack_response(data, sideband);
        let _ = parse_report_status(data, sideband);
    }
});
