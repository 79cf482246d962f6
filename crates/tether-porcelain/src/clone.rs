//! `clone`: copy a remote repository into an empty store.

use crate::negotiate::{fetch_pack, PackRequest};
use crate::outcome::CloneOutcome;
use crate::refspec::{tracking_ref, Refspec};
use crate::{PorcelainError, Result};
use async_trait::async_trait;
use tether_protocol::{AdvertisedRef, RefsAdvertisement};
use tether_storage::{LocalStore, ObjectId, RemoteConfig};
use tether_transport::{parse_remote_url, CancellationToken, Service, Transport};

/// Branch used when the remote does not say which one HEAD points to.
pub const DEFAULT_BRANCH: &str = "main";

/// Warning returned when the remote has no refs.
pub const EMPTY_REPOSITORY_WARNING: &str = "You appear to have cloned an empty repository.";

/// Options for [`clone`].
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Name given to the remote.
    pub remote: String,
    /// Branch to check out instead of the remote HEAD.
    pub branch: Option<String>,
    /// Fetch only this many commits of history.
    pub depth: Option<u32>,
    /// Suppress remote progress.
    pub quiet: bool,
    /// Run the submodule hook after the clone.
    pub recurse_submodules: bool,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: None,
            depth: None,
            quiet: false,
            recurse_submodules: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Checks out submodules of a freshly cloned commit.
#[async_trait]
pub trait SubmoduleHook: Send + Sync {
    /// Called once with the commit the clone checked out.
    async fn update_submodules(&self, commit: &ObjectId) -> Result<()>;
}

/// Clones `url` into `store`, which must be pristine.
pub async fn clone<S: LocalStore>(
    transport: &dyn Transport,
    store: &S,
    url: &str,
    options: &CloneOptions,
    submodules: Option<&dyn SubmoduleHook>,
) -> Result<CloneOutcome> {
    let mut remote_url = parse_remote_url(url)?;
    // http(s) URLs always have a host, so clearing cannot fail
    let _ = remote_url.set_username("");
    let _ = remote_url.set_password(None);
    if !store.is_pristine()? {
        return Err(PorcelainError::DestinationNotEmpty(store.location()));
    }
    if options.cancel.is_cancelled() {
        return Err(PorcelainError::Cancelled);
    }

    tracing::info!(url, remote = %options.remote, "cloning");
    let advertisement = transport.discover_refs(Service::UploadPack).await?;

    let remote = RemoteConfig::new(options.remote.clone(), remote_url.as_str());
    let fetch_specs = remote
        .fetch
        .iter()
        .map(|s| Refspec::parse(s))
        .collect::<Result<Vec<_>>>()?;

    if advertisement.is_empty() {
        store.set_remote(remote)?;
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        store.set_symbolic_ref("HEAD", &format!("refs/heads/{branch}"))?;
        tracing::warn!(url, "{EMPTY_REPOSITORY_WARNING}");
        return Ok(CloneOutcome {
            branch: Some(branch),
            warning: Some(EMPTY_REPOSITORY_WARNING.to_string()),
            ..CloneOutcome::default()
        });
    }

    let checkout = select_branch(&advertisement, options.branch.as_deref())?;

    let wants = advertisement
        .branches
        .iter()
        .chain(&advertisement.tags)
        .map(|r| r.oid)
        .chain(advertisement.head.as_ref().map(|h| h.oid))
        .collect();
    let fetched = fetch_pack(
        transport,
        store,
        &advertisement,
        PackRequest {
            wants,
            haves: Vec::new(),
            depth: options.depth,
            quiet: options.quiet,
            cancel: &options.cancel,
        },
    )
    .await?;
    // written only once the pack is in, so a failed clone can be retried
    store.set_remote(remote)?;

    let mut refs_written = Vec::new();
    for branch in &advertisement.branches {
        if let Some(tracking) = tracking_ref(&fetch_specs, &branch.name) {
            store.set_ref(&tracking, branch.oid)?;
            refs_written.push(tracking);
        }
    }
    for tag in &advertisement.tags {
        store.set_ref(&tag.name, tag.oid)?;
        refs_written.push(tag.name.clone());
    }

    let (branch, head) = match &checkout {
        Some(selected) => {
            let short = selected.name.trim_start_matches("refs/heads/").to_string();
            store.set_ref(&selected.name, selected.oid)?;
            store.set_symbolic_ref("HEAD", &selected.name)?;
            refs_written.push(selected.name.clone());
            if let Some(tracking) = tracking_ref(&fetch_specs, &selected.name) {
                let remote_head = format!("refs/remotes/{}/HEAD", options.remote);
                store.set_symbolic_ref(&remote_head, &tracking)?;
            }
            (Some(short), Some(selected.oid))
        }
        None => {
            // HEAD is detached on the remote and matches no branch
            let head = advertisement.head.as_ref().map(|h| h.oid);
            if let Some(id) = head {
                store.set_ref("HEAD", id)?;
            }
            (None, head)
        }
    };

    if options.recurse_submodules {
        if let (Some(hook), Some(commit)) = (submodules, head) {
            hook.update_submodules(&commit).await?;
        }
    }

    tracing::info!(
        url,
        branch = branch.as_deref().unwrap_or("(detached)"),
        objects = fetched.objects_received,
        refs = refs_written.len(),
        "clone complete"
    );
    Ok(CloneOutcome {
        branch,
        head,
        refs_written,
        warning: None,
        objects_received: fetched.objects_received,
        progress: fetched.progress,
    })
}

/// Picks the branch to check out: the one asked for, else HEAD's symref
/// target, else a branch at HEAD's commit with `main` preferred. `None`
/// means HEAD is detached.
fn select_branch<'a>(
    advertisement: &'a RefsAdvertisement,
    requested: Option<&str>,
) -> Result<Option<&'a AdvertisedRef>> {
    let find = |short: &str| {
        let full = format!("refs/heads/{short}");
        advertisement.branches.iter().find(|b| b.name == full)
    };

    if let Some(requested) = requested {
        let short = requested.trim_start_matches("refs/heads/");
        return find(short)
            .map(Some)
            .ok_or_else(|| PorcelainError::BranchNotFound(short.to_string()));
    }

    if let Some(target) = advertisement.head_target() {
        if let Some(branch) = advertisement.branches.iter().find(|b| b.name == target) {
            return Ok(Some(branch));
        }
    }
    match &advertisement.head {
        Some(head) => Ok(find(DEFAULT_BRANCH)
            .filter(|b| b.oid == head.oid)
            .or_else(|| advertisement.branches.iter().find(|b| b.oid == head.oid))),
        None => Ok(find(DEFAULT_BRANCH).or_else(|| advertisement.branches.first())),
    }
}
