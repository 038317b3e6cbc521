//! Client for the upstream API that owns instance data.

use crate::resolver::extract_isolated_master_short_id;
use crate::types::{InstanceDescriptor, RawDependency};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::OnceCell;
use url::Url;

const USER_AGENT: &str = "link";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("instance not found")]
    NotFound,
    #[error("unexpected status code {0}")]
    Status(u16),
    #[error("login failed with status code {0}")]
    Login(u16),
    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Raw instance data together with the accessors the API client derives
/// from it.
#[derive(Clone, Debug)]
pub struct InstanceHandle {
    pub attrs: InstanceDescriptor,
    user_content_domain: String,
}

impl InstanceHandle {
    pub fn new(attrs: InstanceDescriptor, user_content_domain: impl Into<String>) -> Self {
        InstanceHandle {
            attrs,
            user_content_domain: user_content_domain.into(),
        }
    }

    pub fn branch_name(&self) -> Option<String> {
        self.attrs.branch.clone()
    }

    /// Public hostname shared by every instance of the application.
    pub fn elastic_hostname(&self) -> String {
        if let Some(hostname) = &self.attrs.elastic_hostname {
            return hostname.clone();
        }

        let name = match self.attrs.is_isolated {
            true if extract_isolated_master_short_id(&self.attrs.name).is_ok() => self
                .attrs
                .name
                .split_once("--")
                .map_or(self.attrs.name.as_str(), |(_, rest)| rest),
            _ => self.attrs.name.as_str(),
        };

        format!(
            "{}-staging-{}.{}",
            name, self.attrs.owner.username, self.user_content_domain
        )
        .to_lowercase()
    }

    /// Hostname that reaches this specific instance.
    pub fn container_hostname(&self) -> String {
        match &self.attrs.hostname {
            Some(hostname) => hostname.clone(),
            None => format!("{}-{}", self.attrs.short_id, self.elastic_hostname()).to_lowercase(),
        }
    }
}

#[async_trait]
pub trait InstanceApi: Send + Sync {
    fn new_instance(&self, attrs: InstanceDescriptor) -> InstanceHandle;

    /// `ApiError::NotFound` means the instance no longer exists upstream.
    async fn fetch_dependencies(
        &self,
        instance: &InstanceHandle,
    ) -> Result<Vec<RawDependency>, ApiError>;
}

pub struct HttpInstanceApi {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    user_content_domain: String,
    // Set once the service account session cookie is held by `client`.
    session: OnceCell<()>,
}

impl HttpInstanceApi {
    pub fn new(base_url: &str, token: &str, user_content_domain: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()?;

        Ok(HttpInstanceApi {
            client,
            base_url,
            token: token.to_string(),
            user_content_domain: user_content_domain.to_string(),
            session: OnceCell::new(),
        })
    }

    /// Logs in as the service account. Concurrent callers share a single
    /// in-flight attempt; a failed attempt leaves the cell empty so the next
    /// call tries again.
    async fn login(&self) -> Result<(), ApiError> {
        self.session
            .get_or_try_init(|| async {
                let url = self.base_url.join("auth/github/token")?;
                let response = self
                    .client
                    .post(url)
                    .json(&json!({ "accessToken": self.token }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    tracing::error!(status = %response.status(), "service account login failed");
                    return Err(ApiError::Login(response.status().as_u16()));
                }

                tracing::info!("logged in to the API as the service account");
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceApi for HttpInstanceApi {
    fn new_instance(&self, attrs: InstanceDescriptor) -> InstanceHandle {
        InstanceHandle::new(attrs, self.user_content_domain.as_str())
    }

    async fn fetch_dependencies(
        &self,
        instance: &InstanceHandle,
    ) -> Result<Vec<RawDependency>, ApiError> {
        self.login().await?;

        let url = self
            .base_url
            .join(&format!("instances/{}/dependencies", instance.attrs.short_id))?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response
                .json::<Option<Vec<RawDependency>>>()
                .await?
                .unwrap_or_default()),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            status => Err(ApiError::Status(status.as_u16())),
        }
    }
}
