//! `push`: send local refs and the objects they need to a remote.

use crate::outcome::PushOutcome;
use crate::refspec::{parse_all, tracking_ref, Refspec};
use crate::{PorcelainError, Result};
use std::collections::{HashMap, HashSet};
use tether_protocol::{
    build_receive_pack_request, select_push_capabilities, uses_sideband, PackEncodeOptions,
    PackEncoder, RefResult, RefStatus, RefUpdate,
};
use tether_storage::{is_ancestor, objects_to_send, LocalStore, ObjectId};
use tether_transport::{CancellationToken, Service, Transport};

/// Options for [`push`].
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Remote to push to.
    pub remote: String,
    /// What to push. Empty means the current branch to the same name.
    pub refspecs: Vec<String>,
    /// Allow non-fast-forward updates for every refspec.
    pub force: bool,
    /// Suppress remote progress.
    pub quiet: bool,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            refspecs: Vec::new(),
            force: false,
            quiet: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// One remote ref this push wants to change.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Planned {
    remote: String,
    /// Null for a delete.
    new: ObjectId,
    force: bool,
}

/// Pushes to the remote named in `options`.
///
/// Non-fast-forward updates are refused locally unless forced. When every
/// update is refused or already current, nothing is sent.
pub async fn push<S: LocalStore>(
    transport: &dyn Transport,
    store: &S,
    options: &PushOptions,
) -> Result<PushOutcome> {
    let remote = store
        .remote(&options.remote)?
        .ok_or_else(|| PorcelainError::UnknownRemote(options.remote.clone()))?;
    let specs = if options.refspecs.is_empty() {
        let branch = store
            .current_branch()?
            .ok_or(PorcelainError::NoCurrentBranch)?;
        let full = format!("refs/heads/{branch}");
        vec![Refspec::parse(&format!("{full}:{full}"))?]
    } else {
        parse_all(&options.refspecs)?
    };
    let planned = plan(store, &specs, options.force)?;
    if options.cancel.is_cancelled() {
        return Err(PorcelainError::Cancelled);
    }

    tracing::info!(remote = %remote.name, url = %remote.url, refs = planned.len(), "pushing");
    let advertisement = transport.discover_refs(Service::ReceivePack).await?;
    let server = &advertisement.capabilities;
    let null = ObjectId::null(store.object_format());

    let mut outcome = PushOutcome::default();
    let mut updates = Vec::new();
    for p in &planned {
        let old = advertisement.find(&p.remote).map_or(null, |r| r.oid);
        let reject = |reason: &str| RefStatus {
            name: p.remote.clone(),
            result: RefResult::Rejected(reason.to_string()),
        };

        if p.new.is_null() {
            if old.is_null() {
                outcome.results.push(reject("remote ref does not exist"));
            } else if !server.has("delete-refs") {
                outcome.results.push(reject("remote does not support deleting refs"));
            } else {
                updates.push(RefUpdate {
                    name: p.remote.clone(),
                    old,
                    new: p.new,
                });
            }
            continue;
        }

        if old == p.new {
            outcome.up_to_date.push(p.remote.clone());
            continue;
        }
        if !old.is_null() && !p.force {
            let fast_forward = store.contains_object(&old)? && is_ancestor(store, &old, &p.new)?;
            if !fast_forward {
                tracing::warn!(reference = %p.remote, "rejected non-fast-forward push");
                outcome.rejected_non_ff.push(p.remote.clone());
                outcome.results.push(reject("non-fast-forward"));
                continue;
            }
        }
        updates.push(RefUpdate {
            name: p.remote.clone(),
            old,
            new: p.new,
        });
    }

    if updates.is_empty() {
        tracing::info!(
            up_to_date = outcome.up_to_date.len(),
            rejected = outcome.results.len(),
            "nothing to push"
        );
        return Ok(outcome);
    }

    let pack = if updates.iter().all(RefUpdate::is_delete) {
        None
    } else {
        let tips: Vec<ObjectId> = updates
            .iter()
            .filter(|u| !u.is_delete())
            .map(|u| u.new)
            .collect();
        let mut exclude = Vec::new();
        for r in advertisement.iter().chain(advertisement.head.as_ref()) {
            if store.contains_object(&r.oid)? {
                exclude.push(r.oid);
            }
        }
        let objects = objects_to_send(store, &tips, &exclude)?;
        let encoded = PackEncoder::new(PackEncodeOptions {
            prefer_ref_delta: !server.has("ofs-delta"),
            ..PackEncodeOptions::default()
        })
        .with_format(store.object_format())
        .encode(&objects)?;
        outcome.objects_sent = encoded.object_count;
        Some(encoded.data)
    };

    let capabilities = select_push_capabilities(server, options.quiet);
    let sideband = uses_sideband(&capabilities);
    let body = build_receive_pack_request(&updates, &capabilities, pack.as_deref())?;
    if options.cancel.is_cancelled() {
        return Err(PorcelainError::Cancelled);
    }
    let report = transport.receive_pack(body, sideband).await?;

    let fetch_specs = parse_all(&remote.fetch)?;
    let new_values: HashMap<&str, ObjectId> =
        updates.iter().map(|u| (u.name.as_str(), u.new)).collect();
    for status in report.refs.iter().filter(|s| s.is_ok()) {
        let (Some(new), Some(tracking)) = (
            new_values.get(status.name.as_str()),
            tracking_ref(&fetch_specs, &status.name),
        ) else {
            continue;
        };
        if new.is_null() {
            store.delete_ref(&tracking)?;
        } else {
            store.set_ref(&tracking, *new)?;
        }
    }

    if let Some(error) = &report.unpack_error {
        tracing::error!(error = %error, "remote failed to unpack");
    }
    for status in &report.refs {
        if let RefResult::Rejected(reason) = &status.result {
            tracing::warn!(reference = %status.name, reason = %reason, "remote rejected update");
        }
    }
    outcome.unpack_error = report.unpack_error;
    outcome.results.extend(report.refs);
    outcome.progress = report.progress;

    tracing::info!(
        remote = %remote.name,
        objects = outcome.objects_sent,
        success = outcome.is_success(),
        "push complete"
    );
    Ok(outcome)
}

/// Resolves refspecs against local refs.
fn plan<S: LocalStore + ?Sized>(store: &S, specs: &[Refspec], force_all: bool) -> Result<Vec<Planned>> {
    let null = ObjectId::null(store.object_format());
    let mut planned: Vec<Planned> = Vec::new();

    for spec in specs {
        let force = spec.force || force_all;
        if spec.is_delete() {
            let dst = spec.dst.as_deref().unwrap_or_default();
            planned.push(Planned {
                remote: expand_remote(dst, "refs/heads/"),
                new: null,
                force: false,
            });
            continue;
        }

        if spec.is_pattern() {
            for name in store.list_refs("refs/")? {
                let Some(remote) = spec.map_src(&name) else { continue };
                if let Some(id) = store.resolve_ref(&name)? {
                    planned.push(Planned { remote, new: id, force });
                }
            }
            continue;
        }

        let (local, id) = resolve_local(store, &spec.src)?;
        let category = if local.starts_with("refs/tags/") {
            "refs/tags/"
        } else {
            "refs/heads/"
        };
        let remote = match spec.dst.as_deref() {
            Some(dst) => expand_remote(dst, category),
            None => local,
        };
        planned.push(Planned { remote, new: id, force });
    }

    let mut seen: HashMap<&str, ObjectId> = HashMap::new();
    for p in &planned {
        if let Some(previous) = seen.insert(p.remote.as_str(), p.new) {
            if previous != p.new {
                return Err(PorcelainError::ConflictingUpdates(p.remote.clone()));
            }
        }
    }
    let mut unique = HashSet::new();
    planned.retain(|p| unique.insert(p.remote.clone()));
    Ok(planned)
}

/// Finds the local ref a push source names, returning its full name and
/// value.
fn resolve_local<S: LocalStore + ?Sized>(store: &S, src: &str) -> Result<(String, ObjectId)> {
    if src == "HEAD" {
        let branch = store
            .current_branch()?
            .ok_or(PorcelainError::NoCurrentBranch)?;
        let full = format!("refs/heads/{branch}");
        let id = store
            .resolve_ref(&full)?
            .ok_or_else(|| PorcelainError::RefNotFound(full.clone()))?;
        return Ok((full, id));
    }

    let candidates = if src.starts_with("refs/") {
        vec![src.to_string()]
    } else {
        vec![
            format!("refs/{src}"),
            format!("refs/heads/{src}"),
            format!("refs/tags/{src}"),
        ]
    };
    for name in candidates {
        if let Some(id) = store.resolve_ref(&name)? {
            return Ok((name, id));
        }
    }
    Err(PorcelainError::RefNotFound(src.to_string()))
}

fn expand_remote(name: &str, category: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("{category}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{GitObject, MemoryStore};

    fn store_with_branch(name: &str) -> (MemoryStore, ObjectId) {
        let store = MemoryStore::new();
        let id = store.put_object(GitObject::blob(name.to_string())).unwrap();
        store.set_ref(&format!("refs/heads/{name}"), id).unwrap();
        (store, id)
    }

    #[test]
    fn test_plan_short_names() {
        let (store, id) = store_with_branch("main");
        let planned = plan(&store, &parse_all(&["main"]).unwrap(), false).unwrap();
        assert_eq!(
            planned,
            [Planned {
                remote: "refs/heads/main".into(),
                new: id,
                force: false
            }]
        );

        let renamed = plan(&store, &parse_all(&["+main:release"]).unwrap(), false).unwrap();
        assert_eq!(renamed[0].remote, "refs/heads/release");
        assert!(renamed[0].force);
    }

    #[test]
    fn test_plan_missing_local_ref() {
        let (store, _) = store_with_branch("main");
        assert!(matches!(
            plan(&store, &parse_all(&["nope"]).unwrap(), false),
            Err(PorcelainError::RefNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_plan_delete_and_update_conflict() {
        let (store, _) = store_with_branch("main");
        let specs = parse_all(&["main", ":main"]).unwrap();
        assert!(matches!(
            plan(&store, &specs, false),
            Err(PorcelainError::ConflictingUpdates(name)) if name == "refs/heads/main"
        ));
    }

    #[test]
    fn test_plan_head() {
        let (store, id) = store_with_branch("dev");
        store.set_symbolic_ref("HEAD", "refs/heads/dev").unwrap();
        let planned = plan(&store, &parse_all(&["HEAD"]).unwrap(), false).unwrap();
        assert_eq!(planned[0].remote, "refs/heads/dev");
        assert_eq!(planned[0].new, id);
    }
}
