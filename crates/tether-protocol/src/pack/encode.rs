//! Pack encoding.

use super::delta::compute_delta;
use super::entry::PackEntryKind;
use super::varint::{encode_entry_header, encode_ofs_offset};
use super::{PACK_HEADER_LEN, PACK_SIGNATURE};
use crate::{GitError, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use tether_storage::{GitObject, ObjectFormat, ObjectId, ObjectType};

/// Longest delta chain the encoder builds.
pub const MAX_DELTA_DEPTH: usize = 50;

/// Objects smaller than this are always written whole.
const MIN_DELTA_SIZE: usize = 32;

/// Knobs for [`PackEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackEncodeOptions {
    /// Try deltas against earlier objects of the same type.
    pub use_delta: bool,
    /// Write REF_DELTA even when the base is in the pack.
    pub prefer_ref_delta: bool,
    /// zlib level, 0 to 9.
    pub compression_level: u32,
    /// Allow deltas against bases the receiver already has.
    pub thin: bool,
}

impl Default for PackEncodeOptions {
    fn default() -> Self {
        Self {
            use_delta: true,
            prefer_ref_delta: false,
            compression_level: 6,
            thin: false,
        }
    }
}

/// A finished pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPack {
    /// Header, entries and trailer.
    pub data: Vec<u8>,
    /// Entries written.
    pub object_count: usize,
    /// How many of them are deltas.
    pub deltas: usize,
    /// The trailer checksum.
    pub checksum: ObjectId,
}

/// Writes version 2 packs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackEncoder {
    options: PackEncodeOptions,
    format: ObjectFormat,
}

struct Written {
    offset: usize,
    depth: usize,
}

impl PackEncoder {
    /// Creates an encoder for SHA-1 packs.
    pub fn new(options: PackEncodeOptions) -> Self {
        Self {
            options,
            format: ObjectFormat::Sha1,
        }
    }

    /// Sets the hash used for REF_DELTA ids and the trailer.
    pub fn with_format(mut self, format: ObjectFormat) -> Self {
        self.format = format;
        self
    }

    /// Encodes `objects` in the given order.
    pub fn encode(&self, objects: &[GitObject]) -> Result<EncodedPack> {
        self.encode_thin(objects, &[])
    }

    /// Encodes `objects`, allowing REF_DELTA against `bases` when the
    /// encoder is thin. Bases are never written to the pack.
    pub fn encode_thin(&self, objects: &[GitObject], bases: &[GitObject]) -> Result<EncodedPack> {
        let count = u32::try_from(objects.len()).map_err(|_| {
            GitError::PackParse(format!("{} objects do not fit in a pack", objects.len()))
        })?;

        let mut pack = Vec::with_capacity(PACK_HEADER_LEN + objects.len() * 64);
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());

        let mut thin_bases: HashMap<ObjectType, &GitObject> = HashMap::new();
        if self.options.thin {
            for base in bases {
                thin_bases.insert(base.object_type, base);
            }
        }

        let mut written: Vec<Written> = Vec::with_capacity(objects.len());
        let mut last_of_type: HashMap<ObjectType, usize> = HashMap::new();
        let mut deltas = 0;

        for (i, object) in objects.iter().enumerate() {
            let offset = pack.len();
            let mut depth = 0;
            let mut entry = None;

            if self.options.use_delta && object.data.len() >= MIN_DELTA_SIZE {
                if let Some(&b) = last_of_type
                    .get(&object.object_type)
                    .filter(|&&b| written[b].depth < MAX_DELTA_DEPTH)
                {
                    let base = &objects[b];
                    if let Some(body) = smaller_delta(&base.data, &object.data) {
                        let kind = if self.options.prefer_ref_delta {
                            PackEntryKind::RefDelta { base: base.id }
                        } else {
                            PackEntryKind::OfsDelta {
                                base_offset: written[b].offset,
                            }
                        };
                        depth = written[b].depth + 1;
                        entry = Some((kind, body));
                    }
                } else if let Some(base) = thin_bases.get(&object.object_type) {
                    if let Some(body) = smaller_delta(&base.data, &object.data) {
                        depth = 1;
                        entry = Some((PackEntryKind::RefDelta { base: base.id }, body));
                    }
                }
            }

            match entry {
                Some((kind, body)) => {
                    deltas += 1;
                    self.write_entry(&mut pack, offset, &kind, &body)?;
                }
                None => {
                    let kind = PackEntryKind::literal(object.object_type);
                    self.write_entry(&mut pack, offset, &kind, &object.data)?;
                }
            }

            written.push(Written { offset, depth });
            last_of_type.insert(object.object_type, i);
        }

        let checksum = self.format.digest(&[&pack]);
        pack.extend_from_slice(checksum.as_bytes());

        tracing::debug!(
            objects = objects.len(),
            deltas,
            bytes = pack.len(),
            "encoded pack"
        );
        Ok(EncodedPack {
            data: pack,
            object_count: objects.len(),
            deltas,
            checksum,
        })
    }

    fn write_entry(
        &self,
        pack: &mut Vec<u8>,
        offset: usize,
        kind: &PackEntryKind,
        body: &[u8],
    ) -> Result<()> {
        encode_entry_header(kind.type_code(), body.len() as u64, pack);
        match kind {
            PackEntryKind::OfsDelta { base_offset } => {
                encode_ofs_offset((offset - base_offset) as u64, pack);
            }
            PackEntryKind::RefDelta { base } => pack.extend_from_slice(base.as_bytes()),
            _ => {}
        }
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(body.len() / 2),
            Compression::new(self.options.compression_level.min(9)),
        );
        encoder.write_all(body)?;
        pack.extend_from_slice(&encoder.finish()?);
        Ok(())
    }
}

/// A delta body from `base` to `target`, if it is shorter than `target`.
fn smaller_delta(base: &[u8], target: &[u8]) -> Option<Vec<u8>> {
    let body = compute_delta(base, target).encode().ok()?;
    (body.len() < target.len()).then_some(body)
}

/// Encodes `objects` with default options.
pub fn encode_pack(objects: &[GitObject]) -> Result<EncodedPack> {
    PackEncoder::default().encode(objects)
}
