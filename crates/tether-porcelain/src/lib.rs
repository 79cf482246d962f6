//! Git porcelain over the smart HTTP protocol.
//!
//! Each operation takes a [`Transport`](tether_transport::Transport) and a
//! [`LocalStore`](tether_storage::LocalStore) and returns an outcome value
//! with per-ref results and an [`exit_code`](PushOutcome::exit_code).
//!
//! # Example
//!
//! ```no_run
//! use tether_porcelain::{clone, CloneOptions};
//! use tether_storage::MemoryStore;
//! use tether_transport::HttpTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let url = "https://example.com/repo.git";
//! let transport = HttpTransport::new(url)?;
//! let store = MemoryStore::new();
//! let outcome = clone(&transport, &store, url, &CloneOptions::default(), None).await?;
//! println!("checked out {:?}", outcome.branch);
//! # Ok(())
//! # }
//! ```

mod clone;
mod error;
mod fetch;
mod negotiate;
mod outcome;
mod pull;
mod push;
mod refspec;

pub use clone::{clone, CloneOptions, SubmoduleHook, DEFAULT_BRANCH, EMPTY_REPOSITORY_WARNING};
pub use error::PorcelainError;
pub use fetch::{fetch, FetchOptions};
pub use outcome::{
    CloneOutcome, FetchOutcome, PullOutcome, PushOutcome, RefChange, EXIT_OK, EXIT_REJECTED,
};
pub use pull::{pull, IntegrationStrategy, Integrator, PullOptions, PullPlan};
pub use push::{push, PushOptions};
pub use refspec::{parse_all, short_name_matches, tracking_ref, Refspec};

/// Result type for porcelain operations.
pub type Result<T> = std::result::Result<T, PorcelainError>;
