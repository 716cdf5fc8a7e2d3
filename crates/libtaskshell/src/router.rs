//! Copies bytes between the local terminal and a session, one task per
//! direction. No direction decides when the session is over; that is the
//! completion signal's job.

use std::io::Read;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::session::SessionStreams;

/// Local endpoints the router bridges to the session.
pub struct LocalStdio<I, O, E> {
    pub input: I,
    pub output: O,
    pub error_output: E,
}

pub struct StreamRouter {
    input: JoinHandle<()>,
    output: JoinHandle<()>,
    error_output: JoinHandle<()>,
}

impl StreamRouter {
    pub fn spawn<I, O, E>(streams: SessionStreams, local: LocalStdio<I, O, E>) -> Self
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        let SessionStreams {
            input,
            output,
            error_output,
        } = streams;

        Self {
            input: tokio::spawn(forward_input(local.input, input)),
            output: tokio::spawn(forward_output(output, local.output, "stdout")),
            error_output: tokio::spawn(forward_output(error_output, local.error_output, "stderr")),
        }
    }

    /// Give the output directions up to `deadline` to flush what the session
    /// already produced, then abandon whatever is still running.
    pub async fn drain(self, deadline: Duration) {
        let outputs = async {
            let _ = self.output.await;
            let _ = self.error_output.await;
        };
        if tokio::time::timeout(deadline, outputs).await.is_err() {
            debug!("output still open after session end; abandoning");
        }
        // Local input is usually blocked on the keyboard.
        self.input.abort();
    }
}

async fn forward_input<R, W>(mut local: R, mut remote: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut local, &mut remote).await {
        Ok(bytes) => debug!(bytes, "local input reached end of stream"),
        Err(e) => debug!("forwarding local input stopped: {e}"),
    }
    if let Err(e) = remote.shutdown().await {
        debug!("closing session input failed: {e}");
    }
}

async fn forward_output<R, W>(mut remote: R, mut local: W, stream: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut remote, &mut local).await {
        Ok(bytes) => debug!(stream, bytes, "session stream exhausted"),
        Err(e) => debug!(stream, "forwarding stopped: {e}"),
    }
    let _ = local.flush().await;
}

pub type ThreadedStdin = StreamReader<UnboundedReceiverStream<std::io::Result<Bytes>>, Bytes>;

/// Process stdin read on a dedicated OS thread.
///
/// A read blocked on the keyboard never holds up runtime shutdown; the
/// thread simply dies with the process.
pub fn threaded_stdin() -> ThreadedStdin {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 8 * 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    StreamReader::new(UnboundedReceiverStream::new(rx))
}
