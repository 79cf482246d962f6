//! `fetch`: bring a configured remote's refs and objects into the store.

use crate::negotiate::{fetch_pack, PackRequest};
use crate::outcome::{FetchOutcome, RefChange};
use crate::refspec::{parse_all, short_name_matches, Refspec};
use crate::{PorcelainError, Result};
use std::collections::HashSet;
use tether_protocol::RefsAdvertisement;
use tether_storage::{is_ancestor, LocalStore, ObjectId, Reference};
use tether_transport::{CancellationToken, Service, Transport};

/// Options for [`fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Remote to fetch from.
    pub remote: String,
    /// Refspecs to use instead of the remote's configured ones.
    pub refspecs: Vec<String>,
    /// Allow non-fast-forward updates for every refspec.
    pub force: bool,
    /// Delete tracking refs whose remote branch is gone.
    pub prune: bool,
    /// Deepen or limit history to this many commits.
    pub depth: Option<u32>,
    /// Suppress remote progress.
    pub quiet: bool,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            refspecs: Vec::new(),
            force: false,
            prune: false,
            depth: None,
            quiet: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// An advertised ref matched by a refspec.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapped {
    remote: String,
    local: Option<String>,
    oid: ObjectId,
    force: bool,
}

/// Fetches from the remote named in `options` and updates local refs.
pub async fn fetch<S: LocalStore>(
    transport: &dyn Transport,
    store: &S,
    options: &FetchOptions,
) -> Result<FetchOutcome> {
    let remote = store
        .remote(&options.remote)?
        .ok_or_else(|| PorcelainError::UnknownRemote(options.remote.clone()))?;
    let specs = if options.refspecs.is_empty() {
        parse_all(&remote.fetch)?
    } else {
        parse_all(&options.refspecs)?
    };
    if options.cancel.is_cancelled() {
        return Err(PorcelainError::Cancelled);
    }

    tracing::info!(remote = %remote.name, url = %remote.url, "fetching");
    let advertisement = transport.discover_refs(Service::UploadPack).await?;
    let mapped = map_refs(&advertisement, &specs, options.force)?;

    let haves = local_tips(store)?;
    let fetched = fetch_pack(
        transport,
        store,
        &advertisement,
        PackRequest {
            wants: mapped.iter().map(|m| m.oid).collect(),
            haves,
            depth: options.depth,
            quiet: options.quiet,
            cancel: &options.cancel,
        },
    )
    .await?;

    let mut outcome = FetchOutcome {
        objects_received: fetched.objects_received,
        progress: fetched.progress,
        ..FetchOutcome::default()
    };

    for m in &mapped {
        let Some(local) = &m.local else { continue };
        let old = store.resolve_ref(local)?;
        if old == Some(m.oid) {
            continue;
        }
        let forced = match old {
            Some(old) => !is_ancestor(store, &old, &m.oid)?,
            None => false,
        };
        if forced && !m.force {
            tracing::warn!(local = %local, remote = %m.remote, "rejected non-fast-forward update");
            outcome.rejected.push(local.clone());
            continue;
        }
        store.set_ref(local, m.oid)?;
        outcome.updated.push(RefChange {
            name: local.clone(),
            old,
            new: m.oid,
            forced,
        });
    }

    // tags the server sent along with the history they point into
    for tag in &advertisement.tags {
        if store.get_ref(&tag.name)?.is_none() && store.contains_object(&tag.oid)? {
            store.set_ref(&tag.name, tag.oid)?;
            outcome.updated.push(RefChange {
                name: tag.name.clone(),
                old: None,
                new: tag.oid,
                forced: false,
            });
        }
    }

    if options.prune {
        outcome.pruned = prune(store, &advertisement, &specs, &mapped)?;
    }

    tracing::info!(
        remote = %remote.name,
        updated = outcome.updated.len(),
        pruned = outcome.pruned.len(),
        rejected = outcome.rejected.len(),
        "fetch complete"
    );
    Ok(outcome)
}

/// Applies `specs` to the advertisement. An exact refspec that matches no
/// advertised ref is an error.
fn map_refs(
    advertisement: &RefsAdvertisement,
    specs: &[Refspec],
    force_all: bool,
) -> Result<Vec<Mapped>> {
    let mut mapped = Vec::new();
    let mut seen = HashSet::new();

    for spec in specs {
        let force = spec.force || force_all;
        if spec.is_pattern() {
            for r in advertisement.iter() {
                if let Some(local) = spec.map_src(&r.name) {
                    if seen.insert(local.clone()) {
                        mapped.push(Mapped {
                            remote: r.name.clone(),
                            local: Some(local),
                            oid: r.oid,
                            force,
                        });
                    }
                }
            }
            continue;
        }

        let found = advertisement
            .find(&spec.src)
            .or_else(|| advertisement.iter().find(|r| short_name_matches(&r.name, &spec.src)))
            .ok_or_else(|| PorcelainError::RefNotFound(spec.src.clone()))?;
        let local = spec.dst.clone();
        if local.as_ref().map_or(true, |l| seen.insert(l.clone())) {
            mapped.push(Mapped {
                remote: found.name.clone(),
                local,
                oid: found.oid,
                force,
            });
        }
    }
    Ok(mapped)
}

/// Every object id a local ref points at.
pub(crate) fn local_tips<S: LocalStore + ?Sized>(store: &S) -> Result<Vec<ObjectId>> {
    let mut tips = Vec::new();
    if let Some(head) = store.resolve_ref("HEAD")? {
        tips.push(head);
    }
    for name in store.list_refs("refs/")? {
        if let Some(id) = store.resolve_ref(&name)? {
            tips.push(id);
        }
    }
    Ok(tips)
}

/// Deletes direct refs under each pattern's destination whose source ref
/// is no longer advertised.
fn prune<S: LocalStore + ?Sized>(
    store: &S,
    advertisement: &RefsAdvertisement,
    specs: &[Refspec],
    mapped: &[Mapped],
) -> Result<Vec<String>> {
    let produced: HashSet<&str> = mapped.iter().filter_map(|m| m.local.as_deref()).collect();
    let mut pruned = Vec::new();

    for spec in specs.iter().filter(|s| s.is_pattern()) {
        let Some(prefix) = spec.dst_prefix() else { continue };
        for name in store.list_refs(prefix)? {
            if produced.contains(name.as_str()) {
                continue;
            }
            if !matches!(store.get_ref(&name)?, Some(Reference::Direct(_))) {
                continue;
            }
            let Some(source) = spec.map_dst(&name) else { continue };
            if advertisement.find(&source).is_none() && store.delete_ref(&name)? {
                tracing::info!(reference = %name, "pruned stale tracking ref");
                pruned.push(name);
            }
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::AdvertisedRef;

    fn adv_ref(name: &str, byte: u8) -> AdvertisedRef {
        AdvertisedRef {
            name: name.to_string(),
            oid: ObjectId::from_bytes([byte; 20]),
            peeled: None,
        }
    }

    fn advertisement() -> RefsAdvertisement {
        RefsAdvertisement {
            branches: vec![adv_ref("refs/heads/main", 1), adv_ref("refs/heads/dev", 2)],
            tags: vec![adv_ref("refs/tags/v1", 3)],
            ..RefsAdvertisement::default()
        }
    }

    #[test]
    fn test_map_pattern() {
        let specs = parse_all(&["+refs/heads/*:refs/remotes/origin/*"]).unwrap();
        let mapped = map_refs(&advertisement(), &specs, false).unwrap();
        let locals: Vec<_> = mapped.iter().filter_map(|m| m.local.as_deref()).collect();
        assert_eq!(locals, ["refs/remotes/origin/main", "refs/remotes/origin/dev"]);
        assert!(mapped.iter().all(|m| m.force));
    }

    #[test]
    fn test_map_exact_short_name() {
        let specs = parse_all(&["dev:refs/remotes/origin/dev"]).unwrap();
        let mapped = map_refs(&advertisement(), &specs, false).unwrap();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].remote, "refs/heads/dev");
        assert!(!mapped[0].force);

        let forced = map_refs(&advertisement(), &specs, true).unwrap();
        assert!(forced[0].force);
    }

    #[test]
    fn test_map_missing_exact_ref() {
        let specs = parse_all(&["refs/heads/gone:refs/remotes/origin/gone"]).unwrap();
        assert!(matches!(
            map_refs(&advertisement(), &specs, false),
            Err(PorcelainError::RefNotFound(name)) if name == "refs/heads/gone"
        ));
    }
}
