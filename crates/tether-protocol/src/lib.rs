//! Git wire protocol for Tether.
//!
//! This crate implements the client half of the git smart HTTP protocol:
//! pkt-line framing, capability negotiation, ref advertisements, the
//! want/have exchange, side-band demultiplexing, receive-pack status
//! reports, and pack files with delta compression.

mod capabilities;
mod error;
mod negotiation;
pub mod pack;
mod pktline;
mod refs;
mod report;
mod sideband;

pub use capabilities::{
    client_agent, select_fetch_capabilities, select_push_capabilities, uses_sideband,
    Capabilities, FetchCapabilityOptions,
};
pub use error::GitError;
pub use negotiation::{
    build_want_list, parse_ack, parse_nak, parse_upload_pack_response, Ack, AckStatus,
    FetchRequest, Nak, NegotiationState, Round, UploadPackResponse, HAVE_BATCH_SIZE,
};
pub use pack::{
    decode_pack, encode_pack, BaseResolver, DecodedPack, EncodedPack, PackDecoder,
    PackEncodeOptions, PackEncoder,
};
pub use pktline::{
    generate_delimiter, generate_flush, generate_line, parse_line, parse_lines, PktLine,
    PktLineReader, PktLineWriter, MAX_PKT_LEN, MAX_PKT_PAYLOAD,
};
pub use refs::{parse_dumb_refs, parse_ref_lines, parse_smart_refs, AdvertisedRef, RefsAdvertisement};
pub use report::{
    build_receive_pack_request, parse_report_status, RefResult, RefStatus, RefUpdate,
    ReportStatus,
};
pub use sideband::{demux, demux_bytes, mux, Channel, Demuxed};

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
