use crate::snapshot::Compression;
use serde::Deserialize;
use url::Url;

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        port: 3001,
        ..Listener::default()
    }
}

impl Listener {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Instance API collaborator.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ApiConfig {
    pub url: String,
    /// Service account token exchanged for a session on first use.
    pub token: String,
    pub user_content_domain: String,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[default]
    Memory,
    Filesystem {
        base_dir: String,
        filename: String,
        #[serde(default)]
        compression: Compression,
    },
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum PublisherConfig {
    #[default]
    Log,
    Webhook {
        url: String,
    },
}

fn default_prefetch() -> usize {
    10
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Maximum number of events processed concurrently.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("listener port must be non-zero")]
    InvalidPort,
    #[error("prefetch must be at least 1")]
    InvalidPrefetch,
    #[error("listener and admin listener cannot share {0}")]
    SameListener(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} is not a valid url: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

fn check_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|err| ValidationError::InvalidUrl {
            field,
            reason: err.to_string(),
        })
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 || self.admin_listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.listener == self.admin_listener {
            return Err(ValidationError::SameListener(self.listener.addr()));
        }
        if self.prefetch == 0 {
            return Err(ValidationError::InvalidPrefetch);
        }
        check_url("api.url", &self.api.url)?;
        if self.api.user_content_domain.is_empty() {
            return Err(ValidationError::Empty("api.user_content_domain"));
        }
        if let PublisherConfig::Webhook { url } = &self.publisher {
            check_url("publisher.url", url)?;
        }
        Ok(())
    }
}
