use std::io;

use taskshell_protocol::{FrameError, ProtocolVersion, RedirectError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::config::ConfigError;

/// Failure of one `taskshell` invocation. Every variant is terminal; nothing
/// is retried.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("task {task_id} {reason}")]
    TaskNotEligible { task_id: String, reason: Ineligible },

    #[error("could not resolve the shell endpoint of task {task_id}: {reason}")]
    EndpointUnresolvable {
        task_id: String,
        reason: Unresolvable,
    },

    #[error("could not create the {version} shell client for task {task_id}: {source}")]
    DialFailed {
        task_id: String,
        version: ProtocolVersion,
        #[source]
        source: DialError,
    },

    #[error("shell session of task {task_id} ended with an error: {source}")]
    Session {
        task_id: String,
        #[source]
        source: SessionError,
    },

    #[error("could not prepare the terminal for task {task_id}: {source}")]
    Terminal {
        task_id: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ShellError {
    pub fn not_eligible(task_id: &str, reason: Ineligible) -> Self {
        Self::TaskNotEligible {
            task_id: task_id.to_string(),
            reason,
        }
    }

    pub fn unresolvable(task_id: &str, reason: impl Into<Unresolvable>) -> Self {
        Self::EndpointUnresolvable {
            task_id: task_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a task cannot be attached to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    #[error("could not be fetched: {0}")]
    DefinitionUnavailable(String),

    #[error("was created without features.interactive")]
    MissingInteractive,

    #[error("was created without features.interactive = true")]
    InteractiveDisabled,

    #[error("status could not be fetched: {0}")]
    StatusUnavailable(String),

    #[error("has no runs")]
    NoRuns,

    #[error("is not running and was not completed in the last {grace_minutes} minutes")]
    NotConnectable { grace_minutes: i64 },
}

/// Why the shell endpoint of an eligible task could not be determined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unresolvable {
    #[error("could not sign the shell artifact url: {0}")]
    Signing(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("shell artifact did not redirect (status {0})")]
    NoRedirect(u16),

    #[error("invalid redirect location: {0}")]
    InvalidLocation(String),

    #[error(transparent)]
    Redirect(#[from] RedirectError),
}

/// Failure to establish a session transport.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("remote rejected the shell handshake with status {status}")]
    Rejected { status: u16 },

    #[error("websocket connection failed: {0}")]
    Transport(#[source] Box<tungstenite::Error>),
}

impl From<tungstenite::Error> for DialError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            other => Self::Transport(Box::new(other)),
        }
    }
}

/// Outcome carried by a session's completion signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("remote command exited with code {code}")]
    Exited { code: i32 },

    #[error("remote command failed")]
    Failed,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("remote shell server shut down")]
    Shutdown,

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("connection lost: {0}")]
    Transport(String),

    #[error("connection closed before the remote command exited")]
    Disconnected,
}
