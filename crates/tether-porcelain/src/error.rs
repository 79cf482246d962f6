//! Porcelain error types.

use tether_protocol::GitError;
use tether_storage::StorageError;
use tether_transport::TransportError;
use thiserror::Error;

/// Errors that stop a porcelain operation.
///
/// Per-ref push rejections are not errors; they are reported in
/// [`PushOutcome`](crate::PushOutcome).
#[derive(Error, Debug)]
pub enum PorcelainError {
    /// The clone destination already holds files.
    #[error("destination path '{0}' already exists and is not an empty directory")]
    DestinationNotEmpty(String),

    /// No remote with this name is configured.
    #[error("no such remote '{0}'")]
    UnknownRemote(String),

    /// A refspec could not be parsed.
    #[error("invalid refspec '{spec}': {reason}")]
    InvalidRefspec {
        /// The refspec as given.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A named local or remote ref does not exist.
    #[error("ref '{0}' not found")]
    RefNotFound(String),

    /// The branch asked for is not on the remote.
    #[error("remote branch '{0}' not found")]
    BranchNotFound(String),

    /// HEAD does not name a branch.
    #[error("not on any branch")]
    NoCurrentBranch,

    /// One push would both delete and update the same ref.
    #[error("ref '{0}' is both deleted and updated")]
    ConflictingUpdates(String),

    /// The working tree has changes and autostash is off.
    #[error("working tree has local changes; commit them or enable autostash")]
    DirtyWorkTree,

    /// The server sent no pack after negotiation ended.
    #[error("remote sent no pack for {0} wanted objects")]
    MissingPack(usize),

    /// The merge or rebase collaborator failed.
    #[error("integration failed: {0}")]
    Integration(String),

    /// The submodule hook failed.
    #[error("submodule update failed: {0}")]
    Submodule(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol or pack failure.
    #[error(transparent)]
    Protocol(#[from] GitError),

    /// Local store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
