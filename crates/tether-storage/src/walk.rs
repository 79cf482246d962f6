//! Object graph traversal over a [`LocalStore`].

use crate::store::LocalStore;
use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use std::collections::{HashSet, VecDeque};

/// Returns true when `ancestor` is reachable from `descendant` through
/// parent links (a commit is its own ancestor).
///
/// Commits missing from the store end that branch of the walk, so a shallow
/// history answers `false` past its boundary.
pub fn is_ancestor<S: LocalStore + ?Sized>(
    store: &S,
    ancestor: &ObjectId,
    descendant: &ObjectId,
) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*descendant]);

    while let Some(id) = queue.pop_front() {
        if id == *ancestor {
            return Ok(true);
        }
        if !seen.insert(id) {
            continue;
        }
        let Some(object) = store.get_object(&id)? else {
            continue;
        };
        if object.object_type == ObjectType::Commit {
            queue.extend(object.parents()?);
        }
    }
    Ok(false)
}

/// Collects every object reachable from `tips` that is not reachable from
/// `exclude`, in the order they were discovered.
///
/// Objects reachable from `exclude` are assumed present on the other side
/// and are only walked as far as the local store has them.
pub fn objects_to_send<S: LocalStore + ?Sized>(
    store: &S,
    tips: &[ObjectId],
    exclude: &[ObjectId],
) -> Result<Vec<GitObject>> {
    let mut excluded = HashSet::new();
    let mut queue: VecDeque<ObjectId> = exclude.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !excluded.insert(id) {
            continue;
        }
        if let Some(object) = store.get_object(&id)? {
            queue.extend(object.links()?);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut queue: VecDeque<ObjectId> = tips.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if excluded.contains(&id) || !seen.insert(id) {
            continue;
        }
        let object = store
            .get_object(&id)?
            .ok_or_else(|| StorageError::ObjectNotFound(id.to_hex()))?;
        queue.extend(object.links()?);
        out.push(object);
    }
    Ok(out)
}
