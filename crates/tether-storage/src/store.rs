//! The local store contract and its in-memory implementation.

use crate::refs::MAX_SYMREF_DEPTH;
use crate::{GitObject, ObjectFormat, ObjectId, RefStore, Reference, Result, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Configuration of one named remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Remote name, e.g. `origin`.
    pub name: String,
    /// Repository URL.
    pub url: String,
    /// Fetch refspecs, e.g. `+refs/heads/*:refs/remotes/origin/*`.
    pub fetch: Vec<String>,
}

impl RemoteConfig {
    /// A remote with the conventional fetch refspec.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let fetch = vec![default_fetch_refspec(&name)];
        Self {
            name,
            url: url.into(),
            fetch,
        }
    }
}

/// The refspec `git clone` configures for a remote.
pub fn default_fetch_refspec(remote: &str) -> String {
    format!("+refs/heads/*:refs/remotes/{remote}/*")
}

/// Everything the protocol layer needs from a local repository.
///
/// A store is a single-writer resource: callers must not run two operations
/// that write the same repository concurrently.
pub trait LocalStore: Send + Sync {
    /// Hash format of the repository.
    fn object_format(&self) -> ObjectFormat {
        ObjectFormat::Sha1
    }

    /// Returns true when the store holds nothing yet (a valid clone target).
    fn is_pristine(&self) -> Result<bool>;

    /// Where the store lives, for messages.
    fn location(&self) -> String {
        "<memory>".to_string()
    }

    /// Retrieves an object by ID.
    fn get_object(&self, id: &ObjectId) -> Result<Option<GitObject>>;

    /// Stores an object and returns its ID.
    fn put_object(&self, object: GitObject) -> Result<ObjectId>;

    /// Checks if an object exists.
    fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.get_object(id)?.is_some())
    }

    /// Reads a reference without following it.
    fn get_ref(&self, name: &str) -> Result<Option<Reference>>;

    /// Points a reference at an object.
    fn set_ref(&self, name: &str, id: ObjectId) -> Result<()>;

    /// Makes `name` a symbolic reference to `target`.
    fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<()>;

    /// Deletes a reference, returning whether it existed.
    fn delete_ref(&self, name: &str) -> Result<bool>;

    /// Lists reference names starting with `prefix`.
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;

    /// Looks up a configured remote.
    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>>;

    /// Adds or replaces a remote.
    fn set_remote(&self, remote: RemoteConfig) -> Result<()>;

    /// Commits recorded as shallow boundaries.
    fn shallow(&self) -> Result<Vec<ObjectId>>;

    /// Replaces the shallow boundary set.
    fn set_shallow(&self, ids: &[ObjectId]) -> Result<()>;

    /// Follows symbolic references to an object id.
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.get_ref(&current)? {
                None => return Ok(None),
                Some(Reference::Direct(id)) => return Ok(Some(id)),
                Some(Reference::Symbolic(target)) => current = target,
            }
        }
        Err(StorageError::SymrefDepth(name.to_string()))
    }

    /// Branch name HEAD points to, if HEAD is symbolic.
    fn current_branch(&self) -> Result<Option<String>> {
        Ok(match self.get_ref("HEAD")? {
            Some(Reference::Symbolic(target)) => {
                target.strip_prefix("refs/heads/").map(str::to_string)
            }
            _ => None,
        })
    }
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn object_format(&self) -> ObjectFormat {
        (**self).object_format()
    }

    fn is_pristine(&self) -> Result<bool> {
        (**self).is_pristine()
    }

    fn location(&self) -> String {
        (**self).location()
    }

    fn get_object(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        (**self).get_object(id)
    }

    fn put_object(&self, object: GitObject) -> Result<ObjectId> {
        (**self).put_object(object)
    }

    fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        (**self).contains_object(id)
    }

    fn get_ref(&self, name: &str) -> Result<Option<Reference>> {
        (**self).get_ref(name)
    }

    fn set_ref(&self, name: &str, id: ObjectId) -> Result<()> {
        (**self).set_ref(name, id)
    }

    fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<()> {
        (**self).set_symbolic_ref(name, target)
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        (**self).delete_ref(name)
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_refs(prefix)
    }

    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>> {
        (**self).remote(name)
    }

    fn set_remote(&self, remote: RemoteConfig) -> Result<()> {
        (**self).set_remote(remote)
    }

    fn shallow(&self) -> Result<Vec<ObjectId>> {
        (**self).shallow()
    }

    fn set_shallow(&self, ids: &[ObjectId]) -> Result<()> {
        (**self).set_shallow(ids)
    }
}

/// In-memory local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    format: ObjectFormat,
    objects: RwLock<HashMap<ObjectId, GitObject>>,
    refs: RefStore,
    remotes: RwLock<BTreeMap<String, RemoteConfig>>,
    shallow: RwLock<BTreeSet<ObjectId>>,
}

impl MemoryStore {
    /// Creates a new empty SHA-1 store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store for the given hash format.
    pub fn with_format(format: ObjectFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Number of objects held.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Lists all object IDs.
    pub fn list_objects(&self) -> Vec<ObjectId> {
        self.objects.read().keys().copied().collect()
    }
}

impl LocalStore for MemoryStore {
    fn object_format(&self) -> ObjectFormat {
        self.format
    }

    fn is_pristine(&self) -> Result<bool> {
        Ok(self.objects.read().is_empty()
            && self.refs.list("").is_empty()
            && self.remotes.read().is_empty())
    }

    fn get_object(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        Ok(self.objects.read().get(id).cloned())
    }

    fn put_object(&self, object: GitObject) -> Result<ObjectId> {
        let id = object.id;
        self.objects.write().insert(id, object);
        Ok(id)
    }

    fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    fn get_ref(&self, name: &str) -> Result<Option<Reference>> {
        Ok(self.refs.get(name))
    }

    fn set_ref(&self, name: &str, id: ObjectId) -> Result<()> {
        self.refs.set(name, id);
        Ok(())
    }

    fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<()> {
        self.refs.set_symbolic(name, target);
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        Ok(self.refs.delete(name))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.refs.list(prefix))
    }

    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>> {
        Ok(self.remotes.read().get(name).cloned())
    }

    fn set_remote(&self, remote: RemoteConfig) -> Result<()> {
        self.remotes.write().insert(remote.name.clone(), remote);
        Ok(())
    }

    fn shallow(&self) -> Result<Vec<ObjectId>> {
        Ok(self.shallow.read().iter().copied().collect())
    }

    fn set_shallow(&self, ids: &[ObjectId]) -> Result<()> {
        *self.shallow.write() = ids.iter().copied().collect();
        Ok(())
    }
}
