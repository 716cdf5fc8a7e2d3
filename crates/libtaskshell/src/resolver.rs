use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskshell_protocol::EndpointDescriptor;
use tracing::{debug, info};

use crate::config::{ConfigError, ShellConfig};
use crate::error::{Ineligible, ShellError, Unresolvable};
use crate::queue::{QueueClient, RedirectOutcome};
use crate::validate::check_eligibility;

/// Turns a task id into the endpoint its shell is served from.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, task_id: &str) -> Result<EndpointDescriptor, ShellError>;
}

/// Resolves endpoints through the queue: the task must be interactive and
/// live, and its shell artifact must redirect to a versioned socket url.
pub struct QueueResolver {
    queue: QueueClient,
    artifact: String,
    signed_url_ttl: Duration,
    completed_grace: Duration,
}

impl QueueResolver {
    pub fn new(config: &ShellConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            queue: QueueClient::new(config)?,
            artifact: config.shell_artifact.clone(),
            signed_url_ttl: config.signed_url_ttl,
            completed_grace: config.completed_grace,
        })
    }

    async fn validate(&self, task_id: &str) -> Result<(), ShellError> {
        let task = self
            .queue
            .task(task_id)
            .await
            .map_err(|e| ShellError::not_eligible(task_id, Ineligible::DefinitionUnavailable(e.to_string())))?;
        let status = self
            .queue
            .status(task_id)
            .await
            .map_err(|e| ShellError::not_eligible(task_id, Ineligible::StatusUnavailable(e.to_string())))?;

        check_eligibility(&task, &status, Utc::now(), self.completed_grace)
            .map_err(|reason| ShellError::not_eligible(task_id, reason))
    }
}

#[async_trait]
impl EndpointResolver for QueueResolver {
    async fn resolve(&self, task_id: &str) -> Result<EndpointDescriptor, ShellError> {
        self.validate(task_id).await?;

        let artifact = self
            .queue
            .latest_artifact_url(task_id, &self.artifact, self.signed_url_ttl)
            .map_err(|e| ShellError::unresolvable(task_id, Unresolvable::Signing(e.to_string())))?;
        debug!(artifact = %artifact.path(), "requesting shell artifact");

        let target = match self.queue.redirect_target(&artifact).await {
            Ok(RedirectOutcome::Location(target)) => target,
            Ok(RedirectOutcome::NotRedirected(status)) => {
                return Err(ShellError::unresolvable(task_id, Unresolvable::NoRedirect(status)));
            }
            Ok(RedirectOutcome::MissingLocation) => {
                return Err(ShellError::unresolvable(
                    task_id,
                    Unresolvable::InvalidLocation("missing Location header".into()),
                ));
            }
            Ok(RedirectOutcome::InvalidLocation(reason)) => {
                return Err(ShellError::unresolvable(task_id, Unresolvable::InvalidLocation(reason)));
            }
            Err(e) => return Err(ShellError::unresolvable(task_id, Unresolvable::Request(e.to_string()))),
        };

        let endpoint = EndpointDescriptor::from_redirect(&target)
            .map_err(|e| ShellError::unresolvable(task_id, e))?;
        info!(
            task_id,
            version = %endpoint.protocol_version,
            host = endpoint.socket_address.host_str().unwrap_or_default(),
            "resolved shell endpoint"
        );
        Ok(endpoint)
    }
}
