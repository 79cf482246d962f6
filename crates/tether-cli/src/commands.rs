//! CLI command implementations.

use crate::config::{Config, ConfigCredentials};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tether_porcelain::{
    CloneOptions, FetchOptions, FetchOutcome, IntegrationStrategy, Integrator, PorcelainError,
    PullOptions, PullPlan, PushOptions,
};
use tether_protocol::RefResult;
use tether_storage::{is_ancestor, FsStore, LocalStore, ObjectId};
use tether_transport::{CancellationToken, HttpTransport, Service, Transport};

/// Shared state for one invocation.
pub struct Context {
    pub config: Config,
    pub cancel: CancellationToken,
    pub quiet: bool,
}

impl Context {
    fn transport(&self, url: &str) -> Result<HttpTransport> {
        let provider = Arc::new(ConfigCredentials::new(self.config.clone()));
        Ok(
            HttpTransport::with_config(url, self.config.transport.clone())?
                .with_credential_provider(provider)
                .with_cancellation(self.cancel.clone()),
        )
    }
}

/// Directory name `git clone` would pick for `url`.
pub fn default_directory(url: &str) -> Option<PathBuf> {
    let path = url.split(['?', '#']).next()?.trim_end_matches('/');
    let name = path.rsplit('/').next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    (!name.is_empty() && !name.contains(':')).then(|| PathBuf::from(name))
}

fn open_repository() -> Result<FsStore> {
    let dir = std::env::current_dir().context("reading current directory")?;
    if !dir.join(".git").is_dir() {
        bail!("not a repository: {}", dir.display());
    }
    Ok(FsStore::open(dir)?)
}

fn remote_url(store: &FsStore, name: &str) -> Result<String> {
    match store.remote(name)? {
        Some(remote) => Ok(remote.url),
        None => bail!("no such remote '{name}'"),
    }
}

fn short(id: &ObjectId) -> String {
    id.to_hex().chars().take(7).collect()
}

pub async fn clone(
    ctx: &Context,
    url: &str,
    dir: Option<PathBuf>,
    branch: Option<String>,
    depth: Option<u32>,
) -> Result<i32> {
    let dir = match dir.or_else(|| default_directory(url)) {
        Some(dir) => dir,
        None => bail!("cannot guess a directory name from '{url}'; pass one explicitly"),
    };
    if !ctx.quiet {
        eprintln!("Cloning into '{}'...", dir.display());
    }

    let transport = ctx.transport(url)?;
    let store = FsStore::open(&dir)?;
    let options = CloneOptions {
        branch,
        depth,
        quiet: ctx.quiet,
        cancel: ctx.cancel.clone(),
        ..CloneOptions::default()
    };
    let outcome = tether_porcelain::clone(&transport, &store, url, &options, None).await?;

    if let Some(warning) = &outcome.warning {
        eprintln!("warning: {warning}");
    }
    if !ctx.quiet && outcome.objects_received > 0 {
        eprintln!("Received {} objects.", outcome.objects_received);
    }
    Ok(outcome.exit_code())
}

fn print_fetch(url: &str, outcome: &FetchOutcome) {
    if outcome.updated.is_empty() && outcome.pruned.is_empty() && outcome.rejected.is_empty() {
        return;
    }
    println!("From {url}");
    for change in &outcome.updated {
        match change.old {
            None => println!(" * [new ref]         -> {}", change.name),
            Some(old) if change.forced => println!(
                " + {}...{} -> {}  (forced update)",
                short(&old),
                short(&change.new),
                change.name
            ),
            Some(old) => println!("   {}..{}  -> {}", short(&old), short(&change.new), change.name),
        }
    }
    for name in &outcome.rejected {
        println!(" ! [rejected]        -> {name}  (non-fast-forward)");
    }
    for name in &outcome.pruned {
        println!(" - [deleted]         -> {name}");
    }
}

pub async fn fetch(
    ctx: &Context,
    remote: String,
    refspecs: Vec<String>,
    prune: bool,
    depth: Option<u32>,
    force: bool,
) -> Result<i32> {
    let store = open_repository()?;
    let url = remote_url(&store, &remote)?;
    let transport = ctx.transport(&url)?;
    let options = FetchOptions {
        remote,
        refspecs,
        force,
        prune,
        depth,
        quiet: ctx.quiet,
        cancel: ctx.cancel.clone(),
    };
    let outcome = tether_porcelain::fetch(&transport, &store, &options).await?;
    print_fetch(&url, &outcome);
    Ok(outcome.exit_code())
}

pub async fn push(ctx: &Context, remote: String, refspecs: Vec<String>, force: bool) -> Result<i32> {
    let store = open_repository()?;
    let url = remote_url(&store, &remote)?;
    let transport = ctx.transport(&url)?;
    let options = PushOptions {
        remote,
        refspecs,
        force,
        quiet: ctx.quiet,
        cancel: ctx.cancel.clone(),
    };
    let outcome = tether_porcelain::push(&transport, &store, &options).await?;

    println!("To {url}");
    for name in &outcome.up_to_date {
        println!(" = [up to date]      {name}");
    }
    for status in &outcome.results {
        match &status.result {
            RefResult::Ok => println!("   {}", status.name),
            RefResult::Rejected(reason) => println!(" ! [rejected]        {} ({reason})", status.name),
        }
    }
    if let Some(error) = &outcome.unpack_error {
        eprintln!("error: remote unpack failed: {error}");
    }
    if !outcome.rejected_non_ff.is_empty() {
        eprintln!("hint: updates were rejected because the remote contains work you do not have locally.");
        eprintln!("hint: fetch and integrate the remote changes before pushing again.");
    }
    Ok(outcome.exit_code())
}

/// Integrates by moving the branch forward. Diverged histories are refused;
/// they need a working-tree aware merge or rebase.
struct FastForward<'a> {
    store: &'a FsStore,
}

#[async_trait]
impl Integrator for FastForward<'_> {
    async fn is_dirty(&self) -> tether_porcelain::Result<bool> {
        // the store keeps no checked-out files to compare against
        Ok(false)
    }

    async fn integrate(&self, plan: &PullPlan) -> tether_porcelain::Result<()> {
        let current = self.store.resolve_ref(&plan.branch)?;
        let fast_forward = match current {
            Some(current) => is_ancestor(self.store, &current, &plan.target)?,
            None => true,
        };
        if !fast_forward {
            let action = match plan.strategy {
                IntegrationStrategy::Merge => "merge",
                IntegrationStrategy::Rebase => "rebase",
            };
            return Err(PorcelainError::Integration(format!(
                "{} has diverged from {}; a {action} needs a working tree",
                plan.branch, plan.tracking_ref
            )));
        }
        self.store.set_ref(&plan.branch, plan.target)?;
        if let Some(current) = current {
            println!("Updating {}..{}", short(&current), short(&plan.target));
        }
        println!("Fast-forward");
        Ok(())
    }
}

pub async fn pull(
    ctx: &Context,
    remote: String,
    rebase: bool,
    autostash: bool,
    depth: Option<u32>,
) -> Result<i32> {
    let store = open_repository()?;
    let url = remote_url(&store, &remote)?;
    let transport = ctx.transport(&url)?;
    let options = PullOptions {
        fetch: FetchOptions {
            remote,
            depth,
            quiet: ctx.quiet,
            cancel: ctx.cancel.clone(),
            ..FetchOptions::default()
        },
        branch: None,
        rebase,
        autostash,
    };
    let integrator = FastForward { store: &store };
    let outcome = tether_porcelain::pull(&transport, &store, &integrator, &options).await?;
    print_fetch(&url, &outcome.fetch);
    if outcome.up_to_date {
        println!("Already up to date.");
    }
    Ok(outcome.exit_code())
}

pub async fn ls_remote(ctx: &Context, url: &str) -> Result<i32> {
    let transport = ctx.transport(url)?;
    let advertisement = transport.discover_refs(Service::UploadPack).await?;
    for r in advertisement.head.iter().chain(advertisement.iter()) {
        println!("{}\t{}", r.oid, r.name);
        if let Some(peeled) = r.peeled {
            println!("{peeled}\t{}^{{}}", r.name);
        }
    }
    Ok(tether_porcelain::EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directory() {
        assert_eq!(
            default_directory("https://example.com/org/repo.git"),
            Some(PathBuf::from("repo"))
        );
        assert_eq!(
            default_directory("https://example.com/org/repo/"),
            Some(PathBuf::from("repo"))
        );
        assert_eq!(
            default_directory("https://example.com/tool.git?ref=1"),
            Some(PathBuf::from("tool"))
        );
        assert_eq!(default_directory("https://example.com"), Some(PathBuf::from("example.com")));
        assert_eq!(default_directory("https://"), None);
    }
}
