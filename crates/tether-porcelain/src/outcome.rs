//! What each porcelain operation reports back.

use crate::pull::PullPlan;
use tether_protocol::RefStatus;
use tether_storage::ObjectId;

/// Exit code for success.
pub const EXIT_OK: i32 = 0;
/// Exit code when some update was rejected.
pub const EXIT_REJECTED: i32 = 1;

/// A local ref that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefChange {
    /// Full local ref name.
    pub name: String,
    /// Previous value, `None` for a new ref.
    pub old: Option<ObjectId>,
    /// New value.
    pub new: ObjectId,
    /// The update was not a fast-forward.
    pub forced: bool,
}

/// Result of a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOutcome {
    /// Branch HEAD was set to.
    pub branch: Option<String>,
    /// Commit the branch points at. `None` for an empty repository.
    pub head: Option<ObjectId>,
    /// Local refs created.
    pub refs_written: Vec<String>,
    /// Non-fatal warning, e.g. an empty repository.
    pub warning: Option<String>,
    /// Objects written to the store.
    pub objects_received: usize,
    /// Remote progress text.
    pub progress: String,
}

impl CloneOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        EXIT_OK
    }
}

/// Result of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Refs that moved or were created.
    pub updated: Vec<RefChange>,
    /// Tracking refs removed because the remote branch is gone.
    pub pruned: Vec<String>,
    /// Non-fast-forward updates refused for lack of `+`.
    pub rejected: Vec<String>,
    /// Objects written to the store.
    pub objects_received: usize,
    /// Remote progress text.
    pub progress: String,
}

impl FetchOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.rejected.is_empty() {
            EXIT_OK
        } else {
            EXIT_REJECTED
        }
    }
}

/// Result of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Per-ref results: local rejections first, then the server's report.
    pub results: Vec<RefStatus>,
    /// Objects in the pack sent.
    pub objects_sent: usize,
    /// Refs refused locally as non-fast-forward.
    pub rejected_non_ff: Vec<String>,
    /// Refs the remote already had at the pushed value.
    pub up_to_date: Vec<String>,
    /// Error reported by the remote while unpacking.
    pub unpack_error: Option<String>,
    /// Remote progress text.
    pub progress: String,
}

impl PushOutcome {
    /// True when every requested update was applied or already current.
    pub fn is_success(&self) -> bool {
        self.unpack_error.is_none() && self.results.iter().all(RefStatus::is_ok)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_OK
        } else {
            EXIT_REJECTED
        }
    }
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// The fetch half.
    pub fetch: FetchOutcome,
    /// What was handed to the integrator.
    pub plan: PullPlan,
    /// The local branch already contained the tracking ref; nothing was
    /// integrated.
    pub up_to_date: bool,
}

impl PullOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        self.fetch.exit_code()
    }
}
