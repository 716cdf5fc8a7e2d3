use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::LOCATION;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{ConfigError, Credentials, ShellConfig};

const QUEUE_API: &str = "api/queue/v1/";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid queue url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid certificate: {0}")]
    Certificate(#[from] serde_json::Error),

    #[error("invalid access token")]
    AccessToken,
}

#[derive(Deserialize, Debug, Clone)]
struct TaskStatusResponse {
    status: TaskStatus,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TaskStatus {
    #[serde(default)]
    pub runs: Vec<RunStatus>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunStatus {
    pub state: String,
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
}

/// Minimal client for the task queue service.
#[derive(Debug, Clone)]
pub struct QueueClient {
    http: reqwest::Client,
    no_redirect: reqwest::Client,
    base: Url,
    credentials: Option<Credentials>,
}

impl QueueClient {
    /// All requests carry `config.resolve_timeout` as their deadline.
    pub fn new(config: &ShellConfig) -> Result<Self, ConfigError> {
        let user_agent = format!("taskshell/{}", env!("CARGO_PKG_VERSION"));
        let http = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(config.resolve_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;
        let no_redirect = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(config.resolve_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ConfigError::HttpClient)?;
        let base = config.root_url.join(QUEUE_API).map_err(|source| {
            ConfigError::InvalidRootUrl {
                value: config.root_url.to_string(),
                source,
            }
        })?;

        Ok(Self {
            http,
            no_redirect,
            base,
            credentials: config.credentials.clone(),
        })
    }

    fn task_url(&self, task_id: &str, suffix: &str) -> Result<Url, QueueError> {
        let mut url = self.base.join("task/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(task_id);
        if suffix.is_empty() {
            return Ok(url);
        }
        Ok(Url::parse(&format!("{url}/{suffix}"))?)
    }

    /// Fetch the task definition.
    pub async fn task(&self, task_id: &str) -> Result<serde_json::Value, QueueError> {
        let url = self.task_url(task_id, "")?;
        debug!(%url, "fetching task definition");
        let task = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(task)
    }

    /// Fetch the task status.
    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, QueueError> {
        let url = self.task_url(task_id, "status")?;
        debug!(%url, "fetching task status");
        let resp: TaskStatusResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.status)
    }

    /// URL of the latest run's artifact `name`, pre-signed for `ttl` when
    /// credentials are configured.
    pub fn latest_artifact_url(
        &self,
        task_id: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<Url, QueueError> {
        let mut url = self.task_url(task_id, &format!("artifacts/{name}"))?;
        if let Some(credentials) = &self.credentials {
            let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
            let bewit = bewit(credentials, &url, expires)?;
            url.query_pairs_mut().append_pair("bewit", &bewit);
        }
        Ok(url)
    }

    /// GET `url` without following redirects and return where it points.
    ///
    /// Transport errors are stripped of `url`, which may carry a signature.
    pub async fn redirect_target(&self, url: &Url) -> Result<RedirectOutcome, QueueError> {
        let resp = self
            .no_redirect
            .get(url.clone())
            .send()
            .await
            .map_err(|e| QueueError::Http(e.without_url()))?;
        let status = resp.status();
        if !status.is_redirection() {
            return Ok(RedirectOutcome::NotRedirected(status.as_u16()));
        }
        let Some(location) = resp.headers().get(LOCATION) else {
            return Ok(RedirectOutcome::MissingLocation);
        };
        let location = match location.to_str() {
            Ok(location) => location,
            Err(_) => return Ok(RedirectOutcome::InvalidLocation("non-ascii header".into())),
        };
        match url.join(location) {
            Ok(target) => Ok(RedirectOutcome::Location(target)),
            Err(e) => Ok(RedirectOutcome::InvalidLocation(format!("{location}: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Location(Url),
    NotRedirected(u16),
    MissingLocation,
    InvalidLocation(String),
}

/// Hawk bewit authorizing a single GET of `url` until `expires`.
fn bewit(credentials: &Credentials, url: &Url, expires: i64) -> Result<String, QueueError> {
    let ext = match &credentials.certificate {
        Some(certificate) => {
            let certificate: serde_json::Value = serde_json::from_str(certificate)?;
            let ext = serde_json::json!({ "certificate": certificate });
            STANDARD.encode(serde_json::to_vec(&ext)?)
        }
        None => String::new(),
    };

    let mut resource = url.path().to_string();
    if let Some(query) = url.query() {
        resource.push('?');
        resource.push_str(query);
    }
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default().unwrap_or_default();
    let normalized = format!("hawk.1.bewit\n{expires}\n\nGET\n{resource}\n{host}\n{port}\n\n{ext}\n");

    let mut mac = Hmac::<Sha256>::new_from_slice(credentials.access_token.as_bytes())
        .map_err(|_| QueueError::AccessToken)?;
    mac.update(normalized.as_bytes());
    let mac = STANDARD.encode(mac.finalize().into_bytes());

    let client_id = &credentials.client_id;
    Ok(URL_SAFE_NO_PAD.encode(format!("{client_id}\\{expires}\\{mac}\\{ext}")))
}
