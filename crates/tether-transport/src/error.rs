//! Transport error types.

use tether_protocol::GitError;
use thiserror::Error;

/// Errors raised while talking to a remote.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote URL could not be parsed.
    #[error("invalid remote url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Only `http` and `https` remotes are supported.
    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),

    /// Connection, timeout or body read failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The repository does not exist, or is hidden from us.
    #[error("repository not found: {url}")]
    NotFound {
        /// URL that returned 404.
        url: String,
    },

    /// Credentials were missing or refused.
    #[error("authentication failed for {url}{}", .challenge.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Unauthorized {
        /// URL that returned 401.
        url: String,
        /// Summary of the `WWW-Authenticate` challenge.
        challenge: Option<String>,
    },

    /// The server refused the request because the quota is used up.
    #[error("rate limited by {url}, {remaining} requests left{}", .reset.map(|r| format!(", resets at {r}")).unwrap_or_default())]
    RateLimited {
        /// URL that returned 403.
        url: String,
        /// `X-RateLimit-Limit`, when sent.
        limit: Option<u64>,
        /// `X-RateLimit-Remaining`.
        remaining: u64,
        /// `X-RateLimit-Reset` as a unix timestamp, when sent.
        reset: Option<u64>,
    },

    /// Any other non-2xx response.
    #[error("http {status} from {url}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Response body, truncated.
        message: String,
    },

    /// More redirects than the configured cap.
    #[error("too many redirects (max {max}) starting at {url}")]
    TooManyRedirects {
        /// The configured cap.
        max: usize,
        /// URL of the original request.
        url: String,
    },

    /// A redirect pointed back at a URL already visited.
    #[error("redirect loop at {url}")]
    RedirectLoop {
        /// The repeated URL.
        url: String,
    },

    /// The response could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] GitError),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid transport configuration.
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// True for failures worth retrying: network errors and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Unauthorized { .. } => Some(401),
            Self::RateLimited { .. } => Some(403),
            Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
