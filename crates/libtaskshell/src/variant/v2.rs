use futures_util::{SinkExt, StreamExt};
use taskshell_protocol::v2::{self, Frame, MAX_IN_FLIGHT, Stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::{READ_CHUNK, deliver};
use crate::error::{DialError, SessionError};
use crate::session::{RemoteEnd, Session};

pub(super) async fn dial(socket: &Url, command: &[String], tty: bool) -> Result<Session, DialError> {
    let ws = super::connect(&v2::socket_url(socket, command, tty)).await?;
    let (session, remote) = Session::pipe();
    tokio::spawn(drive(ws, remote, tty));
    Ok(session)
}

/// Pump one v2 connection until the remote sends its exit frame.
///
/// Stdin is only read while fewer than [`MAX_IN_FLIGHT`] bytes are waiting
/// for an ack, and every stdout/stderr payload is acked once written locally.
async fn drive<S>(ws: WebSocketStream<S>, remote: RemoteEnd, tty: bool)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let RemoteEnd {
        mut input,
        output,
        error_output,
        mut resize,
        mut completer,
    } = remote;
    let mut output = Some(output);
    let mut error_output = Some(error_output);
    let (mut sink, mut stream) = ws.split();

    let mut buf = vec![0u8; READ_CHUNK];
    let mut in_flight = 0usize;
    let mut input_open = true;
    let mut resize_open = true;

    let outcome = loop {
        let window = MAX_IN_FLIGHT.saturating_sub(in_flight).min(buf.len());
        tokio::select! {
            _ = completer.abandoned() => break None,

            read = input.read(&mut buf[..window]), if input_open && window > 0 => {
                let payload = match read {
                    Ok(0) => {
                        input_open = false;
                        Vec::new()
                    }
                    Ok(n) => {
                        in_flight += n;
                        buf[..n].to_vec()
                    }
                    Err(e) => {
                        debug!("local input failed: {e}");
                        input_open = false;
                        Vec::new()
                    }
                };
                let frame = Frame::Data { stream: Stream::Stdin, payload };
                if let Err(e) = sink.send(Message::Binary(frame.encode())).await {
                    break Some(Err(SessionError::Transport(e.to_string())));
                }
            }

            geometry = resize.recv(), if resize_open => match geometry {
                Some(geometry) if tty => {
                    let frame = Frame::WindowSize(geometry);
                    if let Err(e) = sink.send(Message::Binary(frame.encode())).await {
                        break Some(Err(SessionError::Transport(e.to_string())));
                    }
                }
                Some(_) => {}
                None => resize_open = false,
            },

            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => match Frame::decode(&bytes) {
                    Ok(Frame::Data { stream: target @ (Stream::Stdout | Stream::Stderr), payload }) => {
                        let (local, name) = if target == Stream::Stdout {
                            (&mut output, "stdout")
                        } else {
                            (&mut error_output, "stderr")
                        };
                        if payload.is_empty() {
                            debug!(stream = name, "remote closed stream");
                            *local = None;
                            continue;
                        }
                        deliver(local, &payload, name).await;
                        let ack = Frame::Ack {
                            stream: target,
                            size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                        };
                        if let Err(e) = sink.send(Message::Binary(ack.encode())).await {
                            break Some(Err(SessionError::Transport(e.to_string())));
                        }
                    }
                    Ok(Frame::Ack { stream: Stream::Stdin, size }) => {
                        in_flight = in_flight.saturating_sub(size as usize);
                    }
                    Ok(Frame::Exit { success: true }) => break Some(Ok(())),
                    Ok(Frame::Exit { success: false }) => break Some(Err(SessionError::Failed)),
                    Ok(other) => debug!(?other, "ignoring unexpected frame"),
                    Err(e) => break Some(Err(SessionError::Protocol(e))),
                },
                Some(Ok(Message::Close(_))) | None => break Some(Err(SessionError::Disconnected)),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(Err(SessionError::Transport(e.to_string()))),
            },
        }
    };

    debug!(?outcome, "v2 session ended");
    drop(output);
    drop(error_output);
    if let Some(outcome) = outcome {
        completer.complete(outcome);
    }
    if let Err(e) = sink.close().await {
        warn!("closing v2 socket failed: {e}");
    }
}
