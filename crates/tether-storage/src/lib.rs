//! Local repository storage for Tether.
//!
//! This crate provides content-addressed git objects, reference management,
//! and the [`LocalStore`] contract the protocol layer writes into, with an
//! in-memory and an on-disk implementation.

mod error;
mod fs;
mod object;
mod refs;
mod store;
mod walk;

pub use error::StorageError;
pub use fs::{decode_loose, encode_loose, FsStore};
pub use object::{GitObject, ObjectFormat, ObjectId, ObjectType, TreeEntry};
pub use refs::{validate_ref_name, RefStore, Reference, MAX_SYMREF_DEPTH};
pub use store::{default_fetch_refspec, LocalStore, MemoryStore, RemoteConfig};
pub use walk::{is_ancestor, objects_to_send};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
