//! Want/have negotiation with upload-pack.
//!
//! Over stateless HTTP every round is a fresh request that repeats the
//! wants and the haves already acknowledged as common, then adds the next
//! batch of haves. Rounds are strictly sequential.

use crate::pktline::{parse_line, PktLine, PktLineReader, PktLineWriter};
use crate::sideband::demux;
use crate::{GitError, Result};
use std::collections::{HashSet, VecDeque};
use tether_storage::ObjectId;

/// Haves sent per negotiation round.
pub const HAVE_BATCH_SIZE: usize = 32;

/// Status suffix of a multi-ack `ACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// `multi_ack`: common object found, keep going.
    Continue,
    /// `multi_ack_detailed`: server can build a pack now.
    Ready,
    /// `multi_ack_detailed`: common object found.
    Common,
}

/// A parsed `ACK <oid> [status]` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Acknowledged object.
    pub oid: ObjectId,
    /// Status, absent for the final ACK.
    pub status: Option<AckStatus>,
}

/// A parsed `NAK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nak;

/// Parses an `ACK` line, returning `None` for anything else.
pub fn parse_ack(line: &[u8]) -> Option<Ack> {
    let text = std::str::from_utf8(line).ok()?.trim_end();
    let rest = text.strip_prefix("ACK ")?;
    let mut parts = rest.split(' ');
    let oid = ObjectId::from_hex(parts.next()?).ok()?;
    let status = match parts.next() {
        None => None,
        Some("continue") => Some(AckStatus::Continue),
        Some("ready") => Some(AckStatus::Ready),
        Some("common") => Some(AckStatus::Common),
        Some(_) => return None,
    };
    Some(Ack { oid, status })
}

/// Parses a `NAK` line, returning `None` for anything else.
pub fn parse_nak(line: &[u8]) -> Option<Nak> {
    let text = std::str::from_utf8(line).ok()?;
    (text.trim_end() == "NAK").then_some(Nak)
}

/// The parts of an upload-pack request that stay fixed across rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Objects to fetch.
    pub wants: Vec<ObjectId>,
    /// Capabilities, sent on the first want line.
    pub capabilities: Vec<String>,
    /// History depth limit, sent as `deepen <n>`.
    pub depth: Option<u32>,
    /// Shallow boundaries the client already has.
    pub shallow: Vec<ObjectId>,
}

impl FetchRequest {
    /// Encodes one round: wants, shallow info, flush, haves, then `done` or
    /// a flush.
    pub fn encode(&self, haves: &[ObjectId], done: bool) -> Result<Vec<u8>> {
        let (first, rest) = self
            .wants
            .split_first()
            .ok_or_else(|| GitError::Protocol("upload-pack request with no wants".to_string()))?;

        let mut writer = PktLineWriter::new();
        writer.write_data(&first_want_line(first, &self.capabilities))?;
        for want in rest {
            writer.write_line(&format!("want {want}"))?;
        }
        for shallow in &self.shallow {
            writer.write_line(&format!("shallow {shallow}"))?;
        }
        if let Some(depth) = self.depth {
            writer.write_line(&format!("deepen {depth}"))?;
        }
        writer.flush_pkt();

        for have in haves {
            writer.write_line(&format!("have {have}"))?;
        }
        if done {
            writer.write_line("done")?;
        } else {
            writer.flush_pkt();
        }
        Ok(writer.into_inner())
    }
}

fn first_want_line(want: &ObjectId, capabilities: &[String]) -> Vec<u8> {
    let mut line = format!("want {want}");
    if !capabilities.is_empty() {
        line.push(' ');
        line.push_str(&capabilities.join(" "));
    }
    line.push('\n');
    line.into_bytes()
}

/// Builds a single-round request: wants, flush, every have, `done`.
pub fn build_want_list(
    wants: &[ObjectId],
    haves: &[ObjectId],
    capabilities: &[String],
) -> Result<Vec<u8>> {
    let request = FetchRequest {
        wants: wants.to_vec(),
        capabilities: capabilities.to_vec(),
        ..FetchRequest::default()
    };
    request.encode(haves, true)
}

/// Haves for one round and whether it ends negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    /// Common objects from earlier rounds followed by the new batch.
    pub haves: Vec<ObjectId>,
    /// Whether the request ends with `done`.
    pub done: bool,
}

/// Negotiation progress for one fetch.
#[derive(Debug, Clone, Default)]
pub struct NegotiationState {
    /// Objects the server acknowledged as common.
    pub common: Vec<ObjectId>,
    /// Haves not yet offered.
    pub pending: VecDeque<ObjectId>,
    /// The server signalled it can build a pack.
    pub is_ready: bool,
    /// `done` has been sent.
    pub is_done: bool,
    /// Rounds started so far.
    pub rounds: usize,
    multi_ack: bool,
    seen_common: HashSet<ObjectId>,
}

impl NegotiationState {
    /// Starts negotiation with the haves to offer, most recent first.
    ///
    /// Without `multi_ack` the server cannot report progress between
    /// rounds, so every have goes out in a single round.
    pub fn new(haves: impl IntoIterator<Item = ObjectId>, multi_ack: bool) -> Self {
        Self {
            pending: haves.into_iter().collect(),
            multi_ack,
            ..Self::default()
        }
    }

    /// Takes the next round's haves. The round is final when the server is
    /// ready, the haves are exhausted, or the server lacks `multi_ack`.
    pub fn next_round(&mut self, batch_size: usize) -> Round {
        self.rounds += 1;
        let take = if self.multi_ack && !self.is_ready {
            batch_size.max(1).min(self.pending.len())
        } else if self.is_ready {
            0
        } else {
            self.pending.len()
        };

        let mut haves = self.common.clone();
        haves.extend(self.pending.drain(..take));
        let done = self.is_ready || self.pending.is_empty() || !self.multi_ack;
        self.is_done = done;
        Round { haves, done }
    }

    /// Records the ACK/NAK lines the server sent for a round.
    pub fn apply(&mut self, acks: &[Ack]) {
        for ack in acks {
            match ack.status {
                Some(AckStatus::Ready) => {
                    self.add_common(ack.oid);
                    self.is_ready = true;
                }
                Some(AckStatus::Continue) | Some(AckStatus::Common) => self.add_common(ack.oid),
                None => {
                    self.add_common(ack.oid);
                    if !self.multi_ack {
                        self.is_ready = true;
                    }
                }
            }
        }
        tracing::debug!(
            round = self.rounds,
            common = self.common.len(),
            pending = self.pending.len(),
            ready = self.is_ready,
            "negotiation round applied"
        );
    }

    fn add_common(&mut self, oid: ObjectId) {
        if self.seen_common.insert(oid) {
            self.common.push(oid);
        }
    }
}

/// Everything an upload-pack response carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackResponse {
    /// ACK lines in order.
    pub acks: Vec<Ack>,
    /// Whether a NAK was received.
    pub nak: bool,
    /// Commits that became shallow boundaries.
    pub shallow: Vec<ObjectId>,
    /// Commits that are no longer shallow.
    pub unshallow: Vec<ObjectId>,
    /// The packfile, when the response carried one.
    pub pack: Option<Vec<u8>>,
    /// Side-band progress text.
    pub progress: String,
}

/// Parses an upload-pack response body.
///
/// Shallow info and ACK/NAK lines come first as plain pkt-lines. The pack
/// follows either side-band framed or as raw bytes starting with `PACK`.
pub fn parse_upload_pack_response(body: &[u8], sideband: bool) -> Result<UploadPackResponse> {
    let mut response = UploadPackResponse::default();
    let mut pos = 0;

    while pos < body.len() {
        if !sideband && body[pos..].starts_with(b"PACK") {
            response.pack = Some(body[pos..].to_vec());
            break;
        }

        let (line, consumed) = parse_line(body, pos)?;
        let data = match line {
            PktLine::Flush | PktLine::Delimiter => {
                pos += consumed;
                continue;
            }
            PktLine::Data(ref data) => data,
        };

        if sideband && matches!(data.first(), Some(1..=3)) {
            let demuxed = demux(&mut PktLineReader::new(&body[pos..]))?;
            if !demuxed.data.is_empty() {
                response.pack = Some(demuxed.data);
            }
            response.progress = demuxed.progress;
            break;
        }
        if let Some(message) = line.as_error() {
            return Err(GitError::Remote(message));
        }

        if let Some(ack) = parse_ack(data) {
            response.acks.push(ack);
        } else if parse_nak(data).is_some() {
            response.nak = true;
        } else if let Some(text) = line.as_str() {
            if let Some(hex) = text.strip_prefix("shallow ") {
                response.shallow.push(parse_oid(hex)?);
            } else if let Some(hex) = text.strip_prefix("unshallow ") {
                response.unshallow.push(parse_oid(hex)?);
            } else {
                return Err(GitError::Protocol(format!(
                    "unexpected upload-pack line: {text}"
                )));
            }
        } else {
            return Err(GitError::Protocol(
                "unexpected binary line in upload-pack response".to_string(),
            ));
        }
        pos += consumed;
    }

    Ok(response)
}

fn parse_oid(hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex.trim()).map_err(|e| GitError::Protocol(e.to_string()))
}
