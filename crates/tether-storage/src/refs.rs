//! Git reference management.

use crate::{ObjectId, Result, StorageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Symbolic references are followed at most this many hops.
pub const MAX_SYMREF_DEPTH: usize = 5;

/// A git reference (branch, tag, or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// Returns the target name if this is a symbolic reference.
    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(target) => Some(target),
        }
    }
}

/// Checks that `name` is usable as a reference name.
///
/// Applies the subset of `git check-ref-format` rules that matter for names
/// arriving from a remote: no empty components, no `..`, no control bytes,
/// no trailing `.lock`, and nothing that would escape the refs directory.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(StorageError::InvalidRef(format!("{name}: {why}")));

    if name.is_empty() {
        return invalid("empty name");
    }
    if name != "HEAD" && !name.starts_with("refs/") {
        return invalid("must be HEAD or start with refs/");
    }
    if name.contains("..") || name.contains("//") || name.ends_with('/') {
        return invalid("empty or relative path component");
    }
    if name.ends_with(".lock") || name.ends_with('.') {
        return invalid("reserved suffix");
    }
    if name
        .bytes()
        .any(|b| b < 0x20 || b == 0x7f || b" ~^:?*[\\".contains(&b))
    {
        return invalid("forbidden character");
    }
    if name.contains("@{") {
        return invalid("reflog syntax");
    }
    Ok(())
}

/// Thread-safe in-memory reference store.
#[derive(Debug, Default)]
pub struct RefStore {
    refs: RwLock<BTreeMap<String, Reference>>,
}

impl RefStore {
    /// Creates a new empty reference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a reference by name.
    pub fn get(&self, name: &str) -> Option<Reference> {
        self.refs.read().get(name).cloned()
    }

    /// Sets a reference to point to an object.
    pub fn set(&self, name: &str, target: ObjectId) {
        self.refs
            .write()
            .insert(name.to_string(), Reference::Direct(target));
    }

    /// Sets a symbolic reference.
    pub fn set_symbolic(&self, name: &str, target: &str) {
        self.refs
            .write()
            .insert(name.to_string(), Reference::Symbolic(target.to_string()));
    }

    /// Deletes a reference, returning whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        self.refs.write().remove(name).is_some()
    }

    /// Lists reference names with a given prefix, sorted.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.refs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Follows symbolic references until a direct one is found.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.get(&current) {
                None => return Ok(None),
                Some(Reference::Direct(id)) => return Ok(Some(id)),
                Some(Reference::Symbolic(target)) => current = target,
            }
        }
        Err(StorageError::SymrefDepth(name.to_string()))
    }
}
