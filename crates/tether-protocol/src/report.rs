//! receive-pack requests and report-status responses.

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::sideband::demux_bytes;
use crate::{GitError, Result};
use tether_storage::ObjectId;

/// One ref update sent to receive-pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// Full ref name on the remote.
    pub name: String,
    /// Value the remote is expected to have; null when creating.
    pub old: ObjectId,
    /// New value; null when deleting.
    pub new: ObjectId,
}

impl RefUpdate {
    /// True when this update deletes the ref.
    pub fn is_delete(&self) -> bool {
        self.new.is_null()
    }

    /// True when this update creates the ref.
    pub fn is_create(&self) -> bool {
        self.old.is_null()
    }
}

/// Builds a receive-pack request body.
///
/// The first command line carries the capabilities after a NUL. The pack
/// follows the flush and is omitted when every update is a delete.
pub fn build_receive_pack_request(
    updates: &[RefUpdate],
    capabilities: &[String],
    pack: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if updates.is_empty() {
        return Err(GitError::Protocol(
            "receive-pack request with no ref updates".to_string(),
        ));
    }

    let mut writer = PktLineWriter::new();
    for (i, update) in updates.iter().enumerate() {
        let mut line = format!("{} {} {}", update.old, update.new, update.name).into_bytes();
        if i == 0 {
            line.push(0);
            line.extend_from_slice(capabilities.join(" ").as_bytes());
        }
        line.push(b'\n');
        writer.write_data(&line)?;
    }
    writer.flush_pkt();

    if let Some(pack) = pack {
        if !updates.iter().all(RefUpdate::is_delete) {
            writer.write_raw(pack);
        }
    }
    Ok(writer.into_inner())
}

/// Outcome of one ref in a report-status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefResult {
    /// The remote accepted the update.
    Ok,
    /// The remote, or a local pre-check, refused it.
    Rejected(String),
}

/// Per-ref status of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefStatus {
    /// Full ref name.
    pub name: String,
    /// What happened to it.
    pub result: RefResult,
}

impl RefStatus {
    /// True when the update was applied.
    pub fn is_ok(&self) -> bool {
        self.result == RefResult::Ok
    }
}

/// A parsed report-status response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportStatus {
    /// `None` for `unpack ok`, the error text otherwise.
    pub unpack_error: Option<String>,
    /// Per-ref results in the order the server sent them.
    pub refs: Vec<RefStatus>,
    /// Side-band progress text, if any.
    pub progress: String,
}

impl ReportStatus {
    /// True when the pack unpacked and every ref was accepted.
    pub fn is_success(&self) -> bool {
        self.unpack_error.is_none() && self.refs.iter().all(RefStatus::is_ok)
    }
}

/// Parses a receive-pack response, unwrapping side-band channel 1 first
/// when `sideband` was negotiated.
pub fn parse_report_status(body: &[u8], sideband: bool) -> Result<ReportStatus> {
    let (inner, progress) = if sideband {
        let demuxed = demux_bytes(body)?;
        (demuxed.data, demuxed.progress)
    } else {
        (body.to_vec(), String::new())
    };

    let mut report = ReportStatus {
        progress,
        ..ReportStatus::default()
    };
    let mut reader = PktLineReader::new(&inner);
    let mut saw_unpack = false;

    while let Some(line) = reader.read()? {
        if line.is_flush() {
            break;
        }
        if let Some(message) = line.as_error() {
            return Err(GitError::Remote(message));
        }
        let Some(text) = line.as_str() else {
            if matches!(line, PktLine::Delimiter) {
                continue;
            }
            return Err(GitError::Protocol(
                "report-status line is not valid UTF-8".to_string(),
            ));
        };

        if let Some(status) = text.strip_prefix("unpack ") {
            saw_unpack = true;
            if status != "ok" {
                report.unpack_error = Some(status.to_string());
            }
        } else if let Some(name) = text.strip_prefix("ok ") {
            report.refs.push(RefStatus {
                name: name.to_string(),
                result: RefResult::Ok,
            });
        } else if let Some(rest) = text.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            report.refs.push(RefStatus {
                name: name.to_string(),
                result: RefResult::Rejected(reason.to_string()),
            });
        } else {
            return Err(GitError::Protocol(format!(
                "unexpected report-status line: {text}"
            )));
        }
    }

    if !saw_unpack {
        return Err(GitError::Protocol(
            "report-status response has no unpack line".to_string(),
        ));
    }
    Ok(report)
}
