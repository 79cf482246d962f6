//! Smart HTTP transport for Tether.
//!
//! [`Transport`] is the seam the porcelain talks through; [`HttpTransport`]
//! implements it over reqwest with redirects, authentication, retries of
//! refs discovery and rate-limit reporting.

mod auth;
mod config;
mod error;
mod http;
mod retry;
mod transport;

pub use auth::{AuthChallenge, CredentialProvider, Credentials, StaticCredentials};
pub use config::{TransportConfig, DEFAULT_MAX_REDIRECTS};
pub use error::TransportError;
pub use http::{parse_remote_url, HttpTransport};
pub use retry::RetryPolicy;
pub use transport::{Service, Transport};

/// Cooperative cancellation signal for transports and porcelain operations.
pub use tokio_util::sync::CancellationToken;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
