//! Side-band demultiplexing.
//!
//! With `side-band` or `side-band-64k` negotiated, every data frame's first
//! payload byte names a channel: 1 carries pack data, 2 progress text and
//! 3 a fatal error message.

use crate::pktline::{generate_line, PktLine, PktLineReader, MAX_PKT_PAYLOAD};
use crate::{GitError, Result};

/// Side-band channel numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Pack data.
    Data = 1,
    /// Progress messages.
    Progress = 2,
    /// Fatal error text.
    Error = 3,
}

impl Channel {
    /// Maps a channel byte to a channel.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Data),
            2 => Some(Self::Progress),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Result of demultiplexing a side-band stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demuxed {
    /// Concatenated channel 1 bytes.
    pub data: Vec<u8>,
    /// Concatenated channel 2 text.
    pub progress: String,
}

/// Demultiplexes side-band frames until a flush or end of input.
///
/// Channel 3 aborts with [`GitError::Remote`].
pub fn demux(reader: &mut PktLineReader<'_>) -> Result<Demuxed> {
    let mut out = Demuxed::default();
    while let Some(line) = reader.read()? {
        let payload = match line {
            PktLine::Flush => break,
            PktLine::Delimiter => continue,
            PktLine::Data(payload) => payload,
        };
        let Some((&channel, body)) = payload.split_first() else {
            continue;
        };
        match Channel::from_byte(channel) {
            Some(Channel::Data) => out.data.extend_from_slice(body),
            Some(Channel::Progress) => {
                let text = String::from_utf8_lossy(body);
                for message in text.split(['\r', '\n']).filter(|m| !m.trim().is_empty()) {
                    tracing::info!(target: "tether::progress", "{}", message.trim_end());
                }
                out.progress.push_str(&text);
            }
            Some(Channel::Error) => {
                let text = String::from_utf8_lossy(body);
                return Err(GitError::Remote(text.trim_end().to_string()));
            }
            None => {
                return Err(GitError::Protocol(format!(
                    "unknown side-band channel {channel}"
                )))
            }
        }
    }
    Ok(out)
}

/// Demultiplexes an entire buffer.
pub fn demux_bytes(buf: &[u8]) -> Result<Demuxed> {
    demux(&mut PktLineReader::new(buf))
}

/// Frames `data` on `channel`, splitting it across as many lines as needed.
///
/// `max_payload` is the largest frame payload including the channel byte;
/// `side-band` allows 1000, `side-band-64k` the full pkt-line maximum.
pub fn mux(channel: Channel, data: &[u8], max_payload: usize) -> Result<Vec<u8>> {
    let chunk = max_payload.clamp(2, MAX_PKT_PAYLOAD) - 1;
    let mut out = Vec::with_capacity(data.len() + data.len() / chunk * 5 + 5);
    for part in data.chunks(chunk) {
        let mut payload = Vec::with_capacity(part.len() + 1);
        payload.push(channel as u8);
        payload.extend_from_slice(part);
        out.extend_from_slice(&generate_line(&payload)?);
    }
    Ok(out)
}
