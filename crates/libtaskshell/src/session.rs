//! The bidirectional session capability shared by every protocol version.
//!
//! A [`Session`] is one input sink, two output sources, a resize handle and a
//! single-fire completion signal. Protocol variants build one with
//! [`Session::pipe`] and drive the returned [`RemoteEnd`] from their own task;
//! nothing above this module ever sees which variant it is talking to.

use taskshell_protocol::TerminalGeometry;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, duplex};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::SessionError;

/// Bytes buffered per direction between the local side and the driver.
const PIPE_CAPACITY: usize = 64 * 1024;

pub type SessionInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type SessionOutput = Box<dyn AsyncRead + Send + Unpin>;

/// The three data directions of a session.
pub struct SessionStreams {
    /// Shutting this down signals end-of-input to the remote side.
    pub input: SessionInput,
    pub output: SessionOutput,
    pub error_output: SessionOutput,
}

/// Best-effort terminal geometry notifications.
///
/// Cheap to clone. Once the session has ended, calls are silently dropped.
#[derive(Debug, Clone)]
pub struct Resizer {
    tx: mpsc::UnboundedSender<TerminalGeometry>,
}

impl Resizer {
    pub fn resize(&self, geometry: TerminalGeometry) {
        if self.tx.send(geometry).is_err() {
            debug!(%geometry, "resize after session end ignored");
        }
    }
}

/// Resolves once, when the remote session ends.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl Completion {
    /// A driver that goes away without reporting counts as a disconnect.
    pub async fn wait(self) -> Result<(), SessionError> {
        self.rx.await.unwrap_or(Err(SessionError::Disconnected))
    }
}

pub struct Session {
    streams: SessionStreams,
    resizer: Resizer,
    completion: Completion,
}

impl Session {
    /// Create a session together with the end a protocol driver operates.
    pub fn pipe() -> (Self, RemoteEnd) {
        let (local_input, remote_input) = duplex(PIPE_CAPACITY);
        let (remote_output, local_output) = duplex(PIPE_CAPACITY);
        let (remote_error, local_error) = duplex(PIPE_CAPACITY);
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let session = Self {
            streams: SessionStreams {
                input: Box::new(local_input),
                output: Box::new(local_output),
                error_output: Box::new(local_error),
            },
            resizer: Resizer { tx: resize_tx },
            completion: Completion { rx: done_rx },
        };
        let remote = RemoteEnd {
            input: remote_input,
            output: remote_output,
            error_output: remote_error,
            resize: resize_rx,
            completer: Completer { tx: done_tx },
        };
        (session, remote)
    }

    pub fn resizer(&self) -> Resizer {
        self.resizer.clone()
    }

    pub fn into_parts(self) -> (SessionStreams, Resizer, Completion) {
        (self.streams, self.resizer, self.completion)
    }
}

/// Driver-side half of a [`Session`].
pub struct RemoteEnd {
    /// Reads what the local side writes; EOF once local input is closed.
    pub input: DuplexStream,
    pub output: DuplexStream,
    pub error_output: DuplexStream,
    pub resize: mpsc::UnboundedReceiver<TerminalGeometry>,
    pub completer: Completer,
}

/// Consumed on completion, so a session resolves at most once.
#[derive(Debug)]
pub struct Completer {
    tx: oneshot::Sender<Result<(), SessionError>>,
}

impl Completer {
    pub fn complete(self, outcome: Result<(), SessionError>) {
        if self.tx.send(outcome).is_err() {
            debug!("session completed after its owner went away");
        }
    }

    /// Resolves when nobody is waiting for the outcome anymore.
    pub async fn abandoned(&mut self) {
        self.tx.closed().await
    }
}
