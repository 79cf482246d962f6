//! Pack decoding and delta resolution.

use super::delta::{apply_delta, DeltaError};
use super::entry::{PackEntry, PackEntryKind};
use super::varint::{decode_entry_header, decode_ofs_offset};
use super::{PACK_HEADER_LEN, PACK_SIGNATURE};
use crate::{GitError, Result};
use flate2::bufread::ZlibDecoder;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use tether_storage::{GitObject, LocalStore, ObjectFormat, ObjectId};

/// The fixed 12-byte pack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    /// Pack version, 2 or 3.
    pub version: u32,
    /// Number of entries that follow.
    pub object_count: u32,
}

/// Parses and validates the pack header.
pub fn parse_header(pack: &[u8]) -> Result<PackHeader> {
    let header = pack.get(..PACK_HEADER_LEN).ok_or_else(|| {
        GitError::PackParse(format!(
            "pack of {} bytes is shorter than its header",
            pack.len()
        ))
    })?;
    let magic = [header[0], header[1], header[2], header[3]];
    if &magic != PACK_SIGNATURE {
        return Err(GitError::InvalidMagic(magic));
    }
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != 2 && version != 3 {
        return Err(GitError::UnsupportedVersion(version));
    }
    let object_count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    Ok(PackHeader {
        version,
        object_count,
    })
}

/// Reads the entry starting at `offset` and inflates its body.
///
/// `pack` must not include the trailing checksum.
pub fn parse_entry(pack: &[u8], offset: usize, format: ObjectFormat) -> Result<PackEntry> {
    let corrupted = |reason: String| GitError::CorruptedPack { offset, reason };

    let (code, size, header_len) = decode_entry_header(pack, offset)
        .ok_or_else(|| corrupted("truncated entry header".to_string()))?;
    let mut pos = offset + header_len;

    let kind = match code {
        1 => PackEntryKind::Commit,
        2 => PackEntryKind::Tree,
        3 => PackEntryKind::Blob,
        4 => PackEntryKind::Tag,
        6 => {
            let (distance, n) = decode_ofs_offset(pack, pos)
                .ok_or_else(|| corrupted("truncated OFS_DELTA offset".to_string()))?;
            pos += n;
            let distance = usize::try_from(distance)
                .ok()
                .filter(|d| *d > 0 && *d <= offset)
                .ok_or_else(|| {
                    corrupted(format!("OFS_DELTA distance {distance} points outside the pack"))
                })?;
            PackEntryKind::OfsDelta {
                base_offset: offset - distance,
            }
        }
        7 => {
            let raw = pack
                .get(pos..pos + format.raw_len())
                .ok_or_else(|| corrupted("truncated REF_DELTA base id".to_string()))?;
            pos += raw.len();
            PackEntryKind::RefDelta {
                base: ObjectId::from_slice(raw)?,
            }
        }
        other => return Err(corrupted(format!("invalid object type {other}"))),
    };

    let (data, used) = inflate(&pack[pos..], size).map_err(|e| corrupted(e.to_string()))?;
    if data.len() as u64 != size {
        return Err(corrupted(format!(
            "inflated to {} bytes, header declares {size}",
            data.len()
        )));
    }
    pos += used;

    tracing::trace!(offset, code, size, "pack entry");
    Ok(PackEntry {
        offset,
        kind,
        size,
        data,
        consumed: pos - offset,
    })
}

/// Inflates one zlib stream, reading at most `size + 1` bytes of output so
/// an over-long stream is detected. Returns the output and the compressed
/// bytes consumed, adler-32 trailer included.
fn inflate(input: &[u8], size: u64) -> std::io::Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(input);
    let mut out = Vec::with_capacity(size.min(1 << 20) as usize);
    (&mut decoder)
        .take(size.saturating_add(1))
        .read_to_end(&mut out)?;
    Ok((out, decoder.total_in() as usize))
}

/// Result of checking a pack trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Whether the trailer matches.
    pub valid: bool,
    /// Hex checksum carried in the trailer.
    pub expected: String,
    /// Hex checksum of everything before the trailer.
    pub actual: String,
}

/// Checks the SHA-1 trailer of a pack.
pub fn verify_checksum(pack: &[u8]) -> Result<ChecksumReport> {
    verify_checksum_with(ObjectFormat::Sha1, pack)
}

/// Checks the trailer of a pack hashed with `format`.
pub fn verify_checksum_with(format: ObjectFormat, pack: &[u8]) -> Result<ChecksumReport> {
    let trailer_len = format.raw_len();
    let min = PACK_HEADER_LEN + trailer_len;
    if pack.len() < min {
        return Err(GitError::PackParse(format!(
            "pack of {} bytes is shorter than the {min}-byte minimum",
            pack.len()
        )));
    }
    let (body, trailer) = pack.split_at(pack.len() - trailer_len);
    let expected = hex::encode(trailer);
    let actual = format.digest(&[body]).to_hex();
    Ok(ChecksumReport {
        valid: expected == actual,
        expected,
        actual,
    })
}

/// Source of delta bases that are not in the pack (thin packs).
pub trait BaseResolver {
    /// Looks up an object by id.
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<GitObject>>;
}

impl<S: LocalStore + ?Sized> BaseResolver for S {
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        Ok(self.get_object(id)?)
    }
}

/// A fully resolved pack.
#[derive(Debug, Clone, Default)]
pub struct DecodedPack {
    /// Pack version.
    pub version: u32,
    /// Objects in pack order.
    pub objects: Vec<GitObject>,
    /// Hex pack checksum.
    pub checksum: String,
    index: HashMap<ObjectId, usize>,
}

impl DecodedPack {
    /// Looks up an object by id.
    pub fn get(&self, id: &ObjectId) -> Option<&GitObject> {
        self.index.get(id).map(|&i| &self.objects[i])
    }

    /// True when the pack holds `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True for a pack with no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Id to position index.
    pub fn index(&self) -> &HashMap<ObjectId, usize> {
        &self.index
    }
}

/// Decodes packs, resolving OFS_DELTA and REF_DELTA chains.
///
/// Resolution is iterative: each delta walks down its OFS chain with an
/// explicit stack, memoizing every object it rebuilds. REF_DELTA entries
/// whose base has not been rebuilt yet are retried on the next pass; once a
/// pass makes no progress the external resolver is consulted.
#[derive(Clone, Copy, Default)]
pub struct PackDecoder<'a> {
    format: ObjectFormat,
    resolver: Option<&'a dyn BaseResolver>,
}

impl<'a> PackDecoder<'a> {
    /// A SHA-1 decoder with no external bases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hash format of ids and trailer.
    pub fn with_format(mut self, format: ObjectFormat) -> Self {
        self.format = format;
        self
    }

    /// Resolves bases missing from the pack through `resolver`.
    pub fn with_resolver(mut self, resolver: &'a dyn BaseResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Decodes a whole pack. Nothing is returned unless every entry resolves.
    pub fn decode(&self, pack: &[u8]) -> Result<DecodedPack> {
        let report = verify_checksum_with(self.format, pack)?;
        if !report.valid {
            return Err(GitError::ChecksumMismatch {
                expected: report.expected,
                actual: report.actual,
            });
        }
        let header = parse_header(pack)?;
        let body = &pack[..pack.len() - self.format.raw_len()];

        let count = header.object_count as usize;
        if count > body.len() {
            return Err(GitError::PackParse(format!(
                "{count} objects cannot fit in {} bytes",
                body.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut by_offset = HashMap::with_capacity(count);
        let mut offset = PACK_HEADER_LEN;
        for _ in 0..count {
            let entry = parse_entry(body, offset, self.format)?;
            by_offset.insert(offset, entries.len());
            offset += entry.consumed;
            entries.push(entry);
        }
        if offset != body.len() {
            return Err(GitError::PackParse(format!(
                "{} unexpected bytes after the last entry",
                body.len() - offset
            )));
        }

        let mut state = Resolution {
            format: self.format,
            entries: &mut entries,
            by_offset: &by_offset,
            resolved: vec![None; count],
            by_id: HashMap::with_capacity(count),
            external: HashMap::new(),
        };
        let deltas = state.resolve_all(self.resolver)?;

        let objects = state
            .resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| GitError::PackParse("unresolved entries remain".to_string()))?;
        let mut index = HashMap::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            index.entry(object.id).or_insert(i);
        }

        tracing::debug!(
            objects = objects.len(),
            deltas,
            version = header.version,
            "decoded pack"
        );
        Ok(DecodedPack {
            version: header.version,
            objects,
            checksum: report.actual,
            index,
        })
    }
}

/// Decodes a SHA-1 pack with no external bases.
pub fn decode_pack(pack: &[u8]) -> Result<DecodedPack> {
    PackDecoder::new().decode(pack)
}

struct Resolution<'e> {
    format: ObjectFormat,
    entries: &'e mut [PackEntry],
    by_offset: &'e HashMap<usize, usize>,
    resolved: Vec<Option<GitObject>>,
    by_id: HashMap<ObjectId, usize>,
    external: HashMap<ObjectId, GitObject>,
}

impl Resolution<'_> {
    /// Resolves every entry, returning how many were deltas.
    fn resolve_all(&mut self, resolver: Option<&dyn BaseResolver>) -> Result<usize> {
        let mut pending = Vec::new();
        for i in 0..self.entries.len() {
            match self.entries[i].kind.object_type() {
                Some(object_type) => {
                    let data = std::mem::take(&mut self.entries[i].data);
                    let object = GitObject::with_format(self.format, object_type, data);
                    self.by_id.entry(object.id).or_insert(i);
                    self.resolved[i] = Some(object);
                }
                None => pending.push(i),
            }
        }
        let deltas = pending.len();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for i in pending {
                if !self.resolve_chain(i)? {
                    deferred.push(i);
                }
            }
            pending = deferred;

            if pending.len() == before && !self.fetch_external(&pending, resolver)? {
                let (base, offset) = self.unresolved_root(pending[0]);
                return Err(GitError::MissingBaseObject { base, offset });
            }
        }
        Ok(deltas)
    }

    /// Rebuilds entry `i` and any unresolved OFS bases under it. Returns
    /// false when the chain bottoms out in a REF base not yet available.
    fn resolve_chain(&mut self, i: usize) -> Result<bool> {
        let mut stack = vec![i];
        let mut visiting = HashSet::from([i]);

        while let Some(&top) = stack.last() {
            if self.resolved[top].is_some() {
                stack.pop();
                continue;
            }
            let offset = self.entries[top].offset;
            let base = match &self.entries[top].kind {
                PackEntryKind::OfsDelta { base_offset } => {
                    let b = *self.by_offset.get(base_offset).ok_or_else(|| {
                        GitError::CorruptedPack {
                            offset,
                            reason: format!("OFS_DELTA base {base_offset} is not an entry"),
                        }
                    })?;
                    match &self.resolved[b] {
                        Some(object) => object.clone(),
                        None => {
                            if !visiting.insert(b) {
                                return Err(GitError::CorruptedPack {
                                    offset,
                                    reason: "circular delta chain".to_string(),
                                });
                            }
                            stack.push(b);
                            continue;
                        }
                    }
                }
                PackEntryKind::RefDelta { base } => {
                    let found = self
                        .by_id
                        .get(base)
                        .and_then(|&b| self.resolved[b].clone())
                        .or_else(|| self.external.get(base).cloned());
                    match found {
                        Some(object) => object,
                        None => return Ok(false),
                    }
                }
                PackEntryKind::Commit
                | PackEntryKind::Tree
                | PackEntryKind::Blob
                | PackEntryKind::Tag => {
                    return Err(GitError::PackParse(format!(
                        "literal entry at {offset} was not resolved"
                    )))
                }
            };

            let data = apply_delta(&base.data, &self.entries[top].data)
                .map_err(|e| delta_error(offset, e))?;
            let object = GitObject::with_format(self.format, base.object_type, data);
            tracing::trace!(offset, id = %object.id, base = %base.id, "resolved delta");
            self.by_id.entry(object.id).or_insert(top);
            self.resolved[top] = Some(object);
            self.entries[top].data = Vec::new();
            stack.pop();
        }
        Ok(true)
    }

    /// Asks the resolver for every missing REF base. Returns whether any
    /// base was found.
    fn fetch_external(
        &mut self,
        pending: &[usize],
        resolver: Option<&dyn BaseResolver>,
    ) -> Result<bool> {
        let Some(resolver) = resolver else {
            return Ok(false);
        };
        let mut found = false;
        for &i in pending {
            if let PackEntryKind::RefDelta { base } = &self.entries[i].kind {
                if self.by_id.contains_key(base) || self.external.contains_key(base) {
                    continue;
                }
                if let Some(object) = resolver.resolve_base(base)? {
                    tracing::debug!(base = %base, "delta base resolved outside the pack");
                    self.external.insert(*base, object);
                    found = true;
                }
            }
        }
        Ok(found)
    }

    /// Follows OFS links from `i` to the REF base that blocks it.
    fn unresolved_root(&self, mut i: usize) -> (String, usize) {
        for _ in 0..self.entries.len() {
            let entry = &self.entries[i];
            match &entry.kind {
                PackEntryKind::OfsDelta { base_offset } => match self.by_offset.get(base_offset) {
                    Some(&b) if self.resolved[b].is_none() => i = b,
                    _ => return (format!("@{base_offset}"), entry.offset),
                },
                PackEntryKind::RefDelta { base } => return (base.to_hex(), entry.offset),
                _ => break,
            }
        }
        ("unknown".to_string(), self.entries[i].offset)
    }
}

fn delta_error(offset: usize, error: DeltaError) -> GitError {
    match error {
        DeltaError::InvalidInstruction(_) => GitError::CorruptedPack {
            offset,
            reason: error.to_string(),
        },
        _ => GitError::PackParse(format!("delta at offset {offset}: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::delta::{Delta, DeltaInstruction};
    use crate::pack::varint::{encode_entry_header, encode_ofs_offset};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tether_storage::{MemoryStore, ObjectType};

    /// Builds a pack from raw entries, each given as header-extra bytes,
    /// type code, declared size and body.
    struct RawPack {
        body: Vec<u8>,
        count: u32,
        offsets: Vec<usize>,
    }

    impl RawPack {
        fn new() -> Self {
            Self {
                body: Vec::new(),
                count: 0,
                offsets: Vec::new(),
            }
        }

        fn next_offset(&self) -> usize {
            PACK_HEADER_LEN + self.body.len()
        }

        fn push(&mut self, type_code: u8, extra: &[u8], body: &[u8]) -> usize {
            let offset = self.next_offset();
            encode_entry_header(type_code, body.len() as u64, &mut self.body);
            self.body.extend_from_slice(extra);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body).unwrap();
            self.body.extend_from_slice(&encoder.finish().unwrap());
            self.count += 1;
            self.offsets.push(offset);
            offset
        }

        fn literal(&mut self, object: &GitObject) -> usize {
            self.push(object.object_type.pack_type(), &[], &object.data)
        }

        fn ofs_delta(&mut self, base_offset: usize, delta: &[u8]) -> usize {
            let mut extra = Vec::new();
            encode_ofs_offset((self.next_offset() - base_offset) as u64, &mut extra);
            self.push(6, &extra, delta)
        }

        fn ref_delta(&mut self, base: &ObjectId, delta: &[u8]) -> usize {
            self.push(7, base.as_bytes(), delta)
        }

        fn finish(&self) -> Vec<u8> {
            let mut pack = Vec::new();
            pack.extend_from_slice(PACK_SIGNATURE);
            pack.extend_from_slice(&2u32.to_be_bytes());
            pack.extend_from_slice(&self.count.to_be_bytes());
            pack.extend_from_slice(&self.body);
            let checksum = ObjectFormat::Sha1.digest(&[&pack]);
            pack.extend_from_slice(checksum.as_bytes());
            pack
        }
    }

    fn append_delta(base: &[u8], suffix: &[u8]) -> Vec<u8> {
        Delta {
            source_size: base.len() as u64,
            target_size: (base.len() + suffix.len()) as u64,
            instructions: vec![
                DeltaInstruction::Copy {
                    offset: 0,
                    len: base.len() as u64,
                },
                DeltaInstruction::Insert(suffix.to_vec()),
            ],
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_parse_header() {
        let pack = RawPack::new().finish();
        let header = parse_header(&pack).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.object_count, 0);

        let mut bad = pack.clone();
        bad[0] = b'K';
        assert!(matches!(parse_header(&bad), Err(GitError::InvalidMagic(_))));

        let mut v4 = pack;
        v4[7] = 4;
        assert!(matches!(
            parse_header(&v4),
            Err(GitError::UnsupportedVersion(4))
        ));

        assert!(matches!(parse_header(b"PACK"), Err(GitError::PackParse(_))));
    }

    #[test]
    fn test_empty_pack_decodes() {
        let decoded = decode_pack(&RawPack::new().finish()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.version, 2);
    }

    #[test]
    fn test_checksum_report() {
        let mut raw = RawPack::new();
        raw.literal(&GitObject::blob("hello"));
        let mut pack = raw.finish();

        let report = verify_checksum(&pack).unwrap();
        assert!(report.valid);
        assert_eq!(report.expected, report.actual);

        pack[14] ^= 0xff;
        let report = verify_checksum(&pack).unwrap();
        assert!(!report.valid);
        assert!(matches!(
            decode_pack(&pack),
            Err(GitError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_too_short_for_trailer() {
        assert!(matches!(
            verify_checksum(&[0u8; 31]),
            Err(GitError::PackParse(_))
        ));
    }

    #[test]
    fn test_literal_objects() {
        let blob = GitObject::blob("file contents\n");
        let tree = GitObject::tree(&[("100644", "file.txt", blob.id)]);
        let commit = GitObject::commit(&tree.id, &[], "a <a@x> 0 +0000", "a <a@x> 0 +0000", "init\n");

        let mut raw = RawPack::new();
        raw.literal(&commit);
        raw.literal(&tree);
        raw.literal(&blob);
        let decoded = decode_pack(&raw.finish()).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.objects[0], commit);
        assert_eq!(decoded.get(&blob.id), Some(&blob));
        assert!(decoded.contains(&tree.id));
    }

    #[test]
    fn test_reserved_type_codes_are_corruption() {
        for code in [0u8, 5] {
            let mut raw = RawPack::new();
            raw.push(code, &[], b"data");
            let err = decode_pack(&raw.finish()).unwrap_err();
            assert!(
                matches!(err, GitError::CorruptedPack { offset: 12, .. }),
                "type {code}: {err}"
            );
        }
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let mut raw = RawPack::new();
        raw.literal(&GitObject::blob("abc"));
        // rewrite the declared size from 3 to 4
        raw.body[0] = (3 << 4) | 4;
        assert!(matches!(
            decode_pack(&raw.finish()),
            Err(GitError::CorruptedPack { .. })
        ));
    }

    #[test]
    fn test_ofs_delta_chain() {
        let base = GitObject::blob("Hello");
        let mut raw = RawPack::new();
        let base_offset = raw.literal(&base);
        let first = raw.ofs_delta(base_offset, &append_delta(b"Hello", b" World"));
        raw.ofs_delta(first, &append_delta(b"Hello World", b"!"));

        let decoded = decode_pack(&raw.finish()).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(&decoded.objects[1].data[..], b"Hello World");
        assert_eq!(&decoded.objects[2].data[..], b"Hello World!");
        assert_eq!(decoded.objects[2].object_type, ObjectType::Blob);
        assert_eq!(decoded.objects[2].id, GitObject::blob("Hello World!").id);
    }

    #[test]
    fn test_ref_delta_before_its_base() {
        let base = GitObject::blob("Hello");
        let mut raw = RawPack::new();
        raw.ref_delta(&base.id, &append_delta(b"Hello", b"!"));
        raw.literal(&base);

        let decoded = decode_pack(&raw.finish()).unwrap();
        assert_eq!(&decoded.objects[0].data[..], b"Hello!");
        assert_eq!(decoded.objects[1], base);
    }

    #[test]
    fn test_long_ofs_chain() {
        let mut raw = RawPack::new();
        let mut content = b"x".to_vec();
        let mut offset = raw.literal(&GitObject::blob(content.clone()));
        for _ in 0..2_000 {
            offset = raw.ofs_delta(offset, &append_delta(&content, b"x"));
            content.push(b'x');
        }
        let decoded = decode_pack(&raw.finish()).unwrap();
        assert_eq!(decoded.len(), 2_001);
        assert_eq!(decoded.objects[2_000].data.len(), 2_001);
    }

    #[test]
    fn test_missing_ref_base() {
        let absent = GitObject::blob("not in pack");
        let mut raw = RawPack::new();
        raw.ref_delta(&absent.id, &append_delta(b"not in pack", b"!"));

        match decode_pack(&raw.finish()) {
            Err(GitError::MissingBaseObject { base, offset }) => {
                assert_eq!(base, absent.id.to_hex());
                assert_eq!(offset, 12);
            }
            other => panic!("expected missing base, got {other:?}"),
        }
    }

    #[test]
    fn test_thin_pack_with_resolver() {
        let store = MemoryStore::new();
        let base = GitObject::blob("shared base");
        store.put_object(base.clone()).unwrap();

        let mut raw = RawPack::new();
        let first = raw.ref_delta(&base.id, &append_delta(b"shared base", b" 1"));
        raw.ofs_delta(first, &append_delta(b"shared base 1", b"2"));

        let decoded = PackDecoder::new()
            .with_resolver(&store)
            .decode(&raw.finish())
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(&decoded.objects[1].data[..], b"shared base 12");
        assert!(!decoded.contains(&base.id));
    }

    #[test]
    fn test_ofs_base_not_an_entry() {
        let mut raw = RawPack::new();
        let offset = raw.literal(&GitObject::blob("Hello"));
        raw.ofs_delta(offset + 1, &append_delta(b"Hello", b"!"));
        assert!(matches!(
            decode_pack(&raw.finish()),
            Err(GitError::CorruptedPack { .. })
        ));
    }

    #[test]
    fn test_bad_delta_against_base() {
        let mut raw = RawPack::new();
        let offset = raw.literal(&GitObject::blob("Hello"));
        // source size 9 does not match the 5-byte base
        raw.ofs_delta(offset, &append_delta(b"123456789", b"!"));
        assert!(matches!(
            decode_pack(&raw.finish()),
            Err(GitError::PackParse(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut raw = RawPack::new();
        raw.literal(&GitObject::blob("a"));
        raw.body.extend_from_slice(b"junk");
        assert!(decode_pack(&raw.finish()).is_err());
    }
}
