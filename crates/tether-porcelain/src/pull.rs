//! `pull`: fetch, then hand the tracking ref to an [`Integrator`].

use crate::fetch::{fetch, FetchOptions};
use crate::outcome::PullOutcome;
use crate::refspec::{parse_all, tracking_ref};
use crate::{PorcelainError, Result};
use async_trait::async_trait;
use tether_storage::{is_ancestor, LocalStore, ObjectId};
use tether_transport::Transport;

/// How fetched history is combined with the local branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrationStrategy {
    /// Merge the tracking ref into the branch.
    #[default]
    Merge,
    /// Replay local commits on top of the tracking ref.
    Rebase,
}

/// What a pull asks the integrator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullPlan {
    /// Local branch being updated, full name.
    pub branch: String,
    /// Remote-tracking ref that was fetched.
    pub tracking_ref: String,
    /// Commit the tracking ref points at.
    pub target: ObjectId,
    /// Merge or rebase.
    pub strategy: IntegrationStrategy,
    /// Stash local changes around the integration. Set only when the tree
    /// is dirty.
    pub autostash: bool,
}

/// Performs the merge or rebase and owns the working tree.
#[async_trait]
pub trait Integrator: Send + Sync {
    /// True when the working tree has uncommitted changes.
    async fn is_dirty(&self) -> Result<bool>;

    /// Integrates `plan.target` into `plan.branch`.
    async fn integrate(&self, plan: &PullPlan) -> Result<()>;
}

/// Options for [`pull`].
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// The fetch half.
    pub fetch: FetchOptions,
    /// Branch to update. Defaults to the current branch.
    pub branch: Option<String>,
    /// Rebase instead of merging.
    pub rebase: bool,
    /// Stash local changes instead of refusing to pull.
    pub autostash: bool,
}

/// Fetches from the remote, then integrates the current branch's tracking
/// ref unless the branch already contains it.
pub async fn pull<S: LocalStore>(
    transport: &dyn Transport,
    store: &S,
    integrator: &dyn Integrator,
    options: &PullOptions,
) -> Result<PullOutcome> {
    let branch = match &options.branch {
        Some(branch) => branch.trim_start_matches("refs/heads/").to_string(),
        None => store
            .current_branch()?
            .ok_or(PorcelainError::NoCurrentBranch)?,
    };
    let branch = format!("refs/heads/{branch}");
    let remote = store
        .remote(&options.fetch.remote)?
        .ok_or_else(|| PorcelainError::UnknownRemote(options.fetch.remote.clone()))?;

    let dirty = integrator.is_dirty().await?;
    if dirty && !options.autostash {
        return Err(PorcelainError::DirtyWorkTree);
    }

    let fetched = fetch(transport, store, &options.fetch).await?;

    let tracking = tracking_ref(&parse_all(&remote.fetch)?, &branch)
        .ok_or_else(|| PorcelainError::RefNotFound(branch.clone()))?;
    let target = store
        .resolve_ref(&tracking)?
        .ok_or_else(|| PorcelainError::RefNotFound(tracking.clone()))?;

    let up_to_date = match store.resolve_ref(&branch)? {
        Some(local) => local == target || is_ancestor(store, &target, &local)?,
        None => false,
    };
    let plan = PullPlan {
        branch,
        tracking_ref: tracking,
        target,
        strategy: if options.rebase {
            IntegrationStrategy::Rebase
        } else {
            IntegrationStrategy::Merge
        },
        autostash: dirty && options.autostash,
    };

    if up_to_date {
        tracing::info!(branch = %plan.branch, "already up to date");
    } else {
        tracing::info!(
            branch = %plan.branch,
            target = %plan.target,
            strategy = ?plan.strategy,
            "integrating"
        );
        integrator.integrate(&plan).await?;
    }

    Ok(PullOutcome {
        fetch: fetched,
        plan,
        up_to_date,
    })
}
