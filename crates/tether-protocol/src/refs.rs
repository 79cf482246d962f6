//! Ref advertisement parsing for the smart and dumb HTTP protocols.

use crate::capabilities::Capabilities;
use crate::pktline::{PktLine, PktLineReader};
use crate::{GitError, Result};
use std::collections::BTreeMap;
use tether_storage::{ObjectFormat, ObjectId};

const PEELED_SUFFIX: &str = "^{}";

/// A ref as advertised by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
    /// Object the ref points at.
    pub oid: ObjectId,
    /// For annotated tags, the object the tag dereferences to.
    pub peeled: Option<ObjectId>,
}

/// Everything a refs-discovery response describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefsAdvertisement {
    /// Service named by the `# service=` header, if present.
    pub service: Option<String>,
    /// Capabilities from the first ref line.
    pub capabilities: Capabilities,
    /// `HEAD`, when advertised.
    pub head: Option<AdvertisedRef>,
    /// `refs/heads/*`.
    pub branches: Vec<AdvertisedRef>,
    /// `refs/tags/*`.
    pub tags: Vec<AdvertisedRef>,
    /// Everything else, e.g. `refs/pull/*`.
    pub refs: Vec<AdvertisedRef>,
    /// `symref=` mappings from the capabilities.
    pub symrefs: BTreeMap<String, String>,
    /// Shallow boundaries of the remote repository.
    pub shallow: Vec<ObjectId>,
    /// Id width used by this response.
    pub format: ObjectFormat,
}

impl RefsAdvertisement {
    /// True when the remote has no refs at all.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
            && self.branches.is_empty()
            && self.tags.is_empty()
            && self.refs.is_empty()
    }

    /// Branch HEAD points to, from `symref=HEAD:<ref>`.
    pub fn head_target(&self) -> Option<&str> {
        self.symrefs.get("HEAD").map(String::as_str)
    }

    /// Iterates every advertised ref except HEAD.
    pub fn iter(&self) -> impl Iterator<Item = &AdvertisedRef> {
        self.branches
            .iter()
            .chain(self.tags.iter())
            .chain(self.refs.iter())
    }

    /// Looks up a ref by full name, HEAD included.
    pub fn find(&self, name: &str) -> Option<&AdvertisedRef> {
        if name == "HEAD" {
            return self.head.as_ref();
        }
        self.iter().find(|r| r.name == name)
    }

    fn from_ordered(mut adv: Self, ordered: Vec<AdvertisedRef>) -> Self {
        for r in ordered {
            if r.name == "HEAD" {
                adv.head = Some(r);
            } else if r.name.starts_with("refs/heads/") {
                adv.branches.push(r);
            } else if r.name.starts_with("refs/tags/") {
                adv.tags.push(r);
            } else {
                adv.refs.push(r);
            }
        }
        adv
    }
}

/// Parses a smart refs-discovery body, reading up to the flush that ends
/// the ref list.
pub fn parse_smart_refs(body: &[u8]) -> Result<RefsAdvertisement> {
    let mut reader = PktLineReader::new(body);
    let mut lines: Vec<PktLine> = Vec::new();
    while let Some(line) = reader.read()? {
        let ends_header = line.is_flush() && lines.len() == 1 && is_service_header(&lines[0]);
        let ends_refs = line.is_flush() && !ends_header;
        lines.push(line);
        if ends_refs {
            break;
        }
    }
    parse_ref_lines(&lines)
}

fn is_service_header(line: &PktLine) -> bool {
    line.as_str().is_some_and(|s| s.starts_with("# service="))
}

/// Parses pkt-lines from a refs-discovery response.
pub fn parse_ref_lines(lines: &[PktLine]) -> Result<RefsAdvertisement> {
    let mut adv = RefsAdvertisement::default();
    let mut ordered: Vec<AdvertisedRef> = Vec::new();
    let mut format: Option<ObjectFormat> = None;
    let mut first = true;
    let mut iter = lines.iter().peekable();

    if let Some(service) = iter
        .peek()
        .and_then(|line| line.as_str())
        .and_then(|s| s.strip_prefix("# service="))
    {
        adv.service = Some(service.to_string());
        iter.next();
        if iter.peek().is_some_and(|line| line.is_flush()) {
            iter.next();
        }
    }

    for line in iter {
        let data = match line {
            PktLine::Flush => break,
            PktLine::Delimiter => continue,
            PktLine::Data(data) => data,
        };
        if let Some(message) = line.as_error() {
            return Err(GitError::Remote(message));
        }

        let data = data.strip_suffix(b"\n").unwrap_or(data);
        let (refpart, caps) = match data.iter().position(|&b| b == 0) {
            Some(nul) => (&data[..nul], Some(&data[nul + 1..])),
            None => (data, None),
        };
        let refpart = std::str::from_utf8(refpart)
            .map_err(|_| GitError::Protocol("ref line is not valid UTF-8".to_string()))?;

        if first {
            if let Some(caps) = caps {
                adv.capabilities = Capabilities::parse(&String::from_utf8_lossy(caps));
                adv.symrefs = adv.capabilities.symrefs();
            }
            first = false;
        }

        if let Some(hex) = refpart.strip_prefix("shallow ") {
            adv.shallow.push(parse_oid(hex, &mut format)?);
            continue;
        }

        let (hex, name) = refpart
            .split_once(' ')
            .ok_or_else(|| GitError::Protocol(format!("malformed ref line: {refpart}")))?;
        let oid = parse_oid(hex, &mut format)?;

        // advertised by servers whose repository has no refs yet
        if name == "capabilities^{}" && oid.is_null() {
            continue;
        }

        push_ref(&mut ordered, name, oid);
    }

    adv.format = format
        .or_else(|| adv.capabilities.object_format())
        .unwrap_or_default();
    Ok(RefsAdvertisement::from_ordered(adv, ordered))
}

/// Parses the `<oid>\t<name>` listing a dumb server returns for `info/refs`.
pub fn parse_dumb_refs(body: &str) -> Result<RefsAdvertisement> {
    let mut ordered = Vec::new();
    let mut format = None;
    for line in body.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let (hex, name) = line
            .split_once('\t')
            .ok_or_else(|| GitError::Protocol(format!("malformed dumb ref line: {line}")))?;
        let oid = parse_oid(hex, &mut format)?;
        push_ref(&mut ordered, name, oid);
    }
    let adv = RefsAdvertisement {
        format: format.unwrap_or_default(),
        ..RefsAdvertisement::default()
    };
    Ok(RefsAdvertisement::from_ordered(adv, ordered))
}

fn push_ref(ordered: &mut Vec<AdvertisedRef>, name: &str, oid: ObjectId) {
    if let Some(base) = name.strip_suffix(PEELED_SUFFIX) {
        match ordered.last_mut() {
            Some(prev) if prev.name == base && prev.peeled.is_none() => prev.peeled = Some(oid),
            _ => tracing::debug!(name, "peeled entry without a matching ref, ignoring"),
        }
        return;
    }
    ordered.push(AdvertisedRef {
        name: name.to_string(),
        oid,
        peeled: None,
    });
}

fn parse_oid(hex: &str, format: &mut Option<ObjectFormat>) -> Result<ObjectId> {
    let oid = ObjectId::from_hex(hex)
        .map_err(|e| GitError::Protocol(format!("invalid object id in ref line: {e}")))?;
    match *format {
        Some(expected) if expected != oid.format() => Err(GitError::Protocol(format!(
            "object id {hex} does not match the {} ids used earlier in the response",
            expected.as_str()
        ))),
        Some(_) => Ok(oid),
        None => {
            *format = Some(oid.format());
            Ok(oid)
        }
    }
}
