//! One shell invocation, end to end.
//!
//! ```text
//! Resolving -> Connecting -> Streaming -> Completed
//!      \____________\____________\______> Failed
//! ```
//!
//! Nothing is retried. The terminal guard is armed once the endpoint is known
//! and restores the terminal on every path out of `Connecting` and
//! `Streaming`, panics and task cancellation included.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::ShellError;
use crate::resolver::EndpointResolver;
use crate::router::{LocalStdio, StreamRouter};
use crate::terminal::{TerminalDevice, TerminalGuard};
use crate::variant::Dialer;

/// How long trailing output may take to reach the local side once the
/// remote command has ended.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Connecting,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Orchestrator<R, D> {
    resolver: R,
    dialer: D,
    terminal: Arc<dyn TerminalDevice>,
    tty: bool,
    drain_timeout: Duration,
}

impl<R: EndpointResolver, D: Dialer> Orchestrator<R, D> {
    /// `tty` is whether local stdout is an interactive terminal. It is
    /// decided once by the caller and never re-queried.
    pub fn new(resolver: R, dialer: D, terminal: Arc<dyn TerminalDevice>, tty: bool) -> Self {
        Self {
            resolver,
            dialer,
            terminal,
            tty,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Attach `stdio` to the shell of `task_id` and run until the remote
    /// side reports completion.
    ///
    /// An empty or absent `command` falls back to the protocol's default.
    pub async fn run<I, O, E>(
        &self,
        task_id: &str,
        command: Option<Vec<String>>,
        stdio: LocalStdio<I, O, E>,
    ) -> Result<(), ShellError>
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        let result = self.attach(task_id, command, stdio).await;
        match &result {
            Ok(()) => transition(task_id, SessionState::Completed),
            Err(e) => {
                transition(task_id, SessionState::Failed);
                debug!(task_id, "run failed: {e}");
            }
        }
        result
    }

    async fn attach<I, O, E>(
        &self,
        task_id: &str,
        command: Option<Vec<String>>,
        stdio: LocalStdio<I, O, E>,
    ) -> Result<(), ShellError>
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        transition(task_id, SessionState::Resolving);
        let endpoint = self.resolver.resolve(task_id).await?;

        let command = match command.filter(|command| !command.is_empty()) {
            Some(command) => command,
            None => endpoint.default_command.clone().unwrap_or_default(),
        };

        transition(task_id, SessionState::Connecting);
        let mut guard = TerminalGuard::arm(self.tty, self.terminal.clone());
        let session = self
            .dialer
            .dial(&endpoint, &command, self.tty)
            .await
            .map_err(|source| ShellError::DialFailed {
                task_id: task_id.to_string(),
                version: endpoint.protocol_version,
                source,
            })?;

        transition(task_id, SessionState::Streaming);
        let (streams, resizer, completion) = session.into_parts();
        guard.attach(resizer).map_err(|source| ShellError::Terminal {
            task_id: task_id.to_string(),
            source,
        })?;
        let router = StreamRouter::spawn(streams, stdio);

        let outcome = completion.wait().await;
        router.drain(self.drain_timeout).await;
        guard.restore();

        outcome.map_err(|source| ShellError::Session {
            task_id: task_id.to_string(),
            source,
        })
    }
}

fn transition(task_id: &str, state: SessionState) {
    info!(task_id, %state, "session state");
}
