//! # Configuration
//!
//! Settings are read from `~/.config/tether/config.toml`, or the file given
//! with `--config`:
//!
//! ```toml
//! log_level = "info"
//! log_format = "json"
//!
//! [transport]
//! max_redirects = 3
//! timeout = 60000
//!
//! [credentials."git.example.com"]
//! token = "ghp_..."
//! ```

use crate::logging::LogFormat;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tether_transport::{AuthChallenge, CredentialProvider, Credentials, TransportConfig};
use url::Url;

/// Environment variable holding a bearer token for hosts without an entry.
pub const TOKEN_ENV: &str = "TETHER_TOKEN";

/// Credentials configured for one host.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HostCredentials {
    fn to_credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.token {
            return Some(Credentials::Bearer(token.clone()));
        }
        let username = self.username.clone()?;
        Some(Credentials::Basic {
            username,
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default level when neither `-v` nor `RUST_LOG` is given.
    pub log_level: Option<String>,
    /// Default output format for logs.
    pub log_format: Option<LogFormat>,
    /// HTTP transport settings.
    pub transport: TransportConfig,
    /// Credentials keyed by host name.
    pub credentials: HashMap<String, HostCredentials>,
}

impl Config {
    /// The default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tether").join("config.toml"))
    }

    /// Loads `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parses TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Credentials for `host`, falling back to `env_token` as a bearer token.
    pub fn credentials_for(&self, host: &str, env_token: Option<&str>) -> Option<Credentials> {
        self.credentials
            .get(host)
            .and_then(HostCredentials::to_credentials)
            .or_else(|| env_token.map(|t| Credentials::Bearer(t.to_string())))
    }
}

/// Answers 401 challenges from the config file and `TETHER_TOKEN`.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    config: Config,
    env_token: Option<String>,
}

impl ConfigCredentials {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            env_token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentials {
    async fn credentials(&self, url: &Url, challenge: Option<&AuthChallenge>) -> Option<Credentials> {
        let host = url.host_str()?;
        if let Some(challenge) = challenge {
            tracing::debug!(host, %challenge, "looking up credentials");
        }
        self.config.credentials_for(host, self.env_token.as_deref())
    }
}
