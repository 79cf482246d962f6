//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself, or "0000" for flush and "0001" for delimiter.

use crate::{GitError, Result};

/// Largest total frame length, header included.
pub const MAX_PKT_LEN: usize = 65520;
/// Largest payload a single frame can carry.
pub const MAX_PKT_PAYLOAD: usize = MAX_PKT_LEN - 4;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content. Binary safe.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => generate_line(data),
            Self::Flush => Ok(generate_flush().to_vec()),
            Self::Delimiter => Ok(generate_delimiter().to_vec()),
        }
    }

    /// Total on-wire length: 0 for flush, 1 for delimiter, payload + 4 otherwise.
    pub fn total_len(&self) -> usize {
        match self {
            Self::Data(data) => data.len() + 4,
            Self::Flush => 0,
            Self::Delimiter => 1,
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }

    /// Returns the message of an `ERR <message>` packet.
    pub fn as_error(&self) -> Option<String> {
        let data = self.data()?;
        let message = data.strip_prefix(b"ERR ")?;
        Some(
            String::from_utf8_lossy(message)
                .trim_end_matches('\n')
                .to_string(),
        )
    }
}

/// Parses one frame starting at `offset`, returning it and the bytes consumed.
pub fn parse_line(buf: &[u8], offset: usize) -> Result<(PktLine, usize)> {
    let malformed = |reason: String| GitError::MalformedFrame { offset, reason };

    let header = buf
        .get(offset..offset + 4)
        .ok_or_else(|| malformed("truncated length header".to_string()))?;
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(malformed(format!(
            "non-hex length {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    let text = std::str::from_utf8(header).map_err(|_| malformed("non-hex length".to_string()))?;
    let len = usize::from_str_radix(text, 16).map_err(|e| malformed(e.to_string()))?;

    match len {
        0 => Ok((PktLine::Flush, 4)),
        1 => Ok((PktLine::Delimiter, 4)),
        2 | 3 => Err(malformed(format!("length {len} is below the 4-byte minimum"))),
        len if len > MAX_PKT_LEN => Err(malformed(format!(
            "length {len} exceeds {MAX_PKT_LEN}"
        ))),
        len => {
            let payload = buf
                .get(offset + 4..offset + len)
                .ok_or_else(|| {
                    malformed(format!(
                        "frame declares {len} bytes but only {} remain",
                        buf.len() - offset
                    ))
                })?;
            Ok((PktLine::Data(payload.to_vec()), len))
        }
    }
}

/// Parses every frame in `buf`. Flush packets are returned in place and do
/// not end the sequence.
pub fn parse_lines(buf: &[u8]) -> Result<Vec<PktLine>> {
    let mut reader = PktLineReader::new(buf);
    let mut lines = Vec::new();
    while let Some(line) = reader.read()? {
        lines.push(line);
    }
    Ok(lines)
}

/// Frames `payload` as a data line.
pub fn generate_line(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PKT_PAYLOAD {
        return Err(GitError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PKT_PAYLOAD,
        });
    }
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    Ok(out)
}

/// The flush packet.
pub fn generate_flush() -> &'static [u8; 4] {
    b"0000"
}

/// The delimiter packet.
pub fn generate_delimiter() -> &'static [u8; 4] {
    b"0001"
}

/// Reader for pkt-lines held in memory.
///
/// The cursor position is exposed so callers can switch to raw bytes, as
/// upload-pack does when the packfile follows the last ACK unframed.
#[derive(Debug)]
pub struct PktLineReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    /// Creates a new pkt-line reader.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reads the next packet, or `None` at end of input.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let (line, consumed) = parse_line(self.buf, self.pos)?;
        tracing::trace!(offset = self.pos, len = line.total_len(), "pkt-line");
        self.pos += consumed;
        Ok(Some(line))
    }

    /// Reads all packets until a flush packet or end of input.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Byte offset of the cursor.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Writer that accumulates pkt-lines into a buffer.
#[derive(Debug, Default)]
pub struct PktLineWriter {
    buf: Vec<u8>,
}

impl PktLineWriter {
    /// Creates a new pkt-line writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.buf.extend_from_slice(&pkt.encode()?);
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(&generate_line(data)?);
        Ok(())
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        if s.ends_with('\n') {
            return self.write_data(s.as_bytes());
        }
        let mut data = Vec::with_capacity(s.len() + 1);
        data.extend_from_slice(s.as_bytes());
        data.push(b'\n');
        self.write_data(&data)
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) {
        self.buf.extend_from_slice(generate_flush());
    }

    /// Writes a delimiter packet.
    pub fn delimiter_pkt(&mut self) {
        self.buf.extend_from_slice(generate_delimiter());
    }

    /// Appends raw bytes with no framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the accumulated bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
