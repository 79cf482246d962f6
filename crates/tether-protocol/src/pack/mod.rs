//! The pack file format: entry headers, deltas, decoding and encoding.

mod decode;
mod delta;
mod encode;
mod entry;
mod varint;

pub use decode::{
    decode_pack, parse_entry, parse_header, verify_checksum, verify_checksum_with, BaseResolver,
    ChecksumReport, DecodedPack, PackDecoder, PackHeader,
};
pub use delta::{apply_delta, compute_delta, Delta, DeltaError, DeltaInstruction};
pub use encode::{encode_pack, EncodedPack, PackEncodeOptions, PackEncoder, MAX_DELTA_DEPTH};
pub use entry::{PackEntry, PackEntryKind};
pub use varint::{
    decode_entry_header, decode_ofs_offset, decode_varint, encode_entry_header, encode_ofs_offset,
    encode_varint,
};

/// Magic bytes at the start of every pack.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Length of the signature, version and object count.
pub const PACK_HEADER_LEN: usize = 12;
