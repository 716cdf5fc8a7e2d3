use futures_util::{SinkExt, StreamExt};
use taskshell_protocol::v1::{self, ClientMessage, ServerMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::{READ_CHUNK, deliver};
use crate::error::{DialError, SessionError};
use crate::session::{RemoteEnd, Session};

pub(super) async fn dial(socket: &Url, command: &[String], tty: bool) -> Result<Session, DialError> {
    let ws = super::connect(&v1::socket_url(socket, command, tty)).await?;
    let (session, remote) = Session::pipe();
    tokio::spawn(drive(ws, remote, tty));
    Ok(session)
}

/// Pump one v1 connection until the remote reports the command stopped.
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
    let mut input_open = true;
    let mut resize_open = true;
    let mut paused = false;

    let outcome = loop {
        tokio::select! {
            _ = completer.abandoned() => break None,

            read = input.read(&mut buf), if input_open && !paused => {
                let frame = match read {
                    Ok(0) => {
                        input_open = false;
                        ClientMessage::End.encode()
                    }
                    Ok(n) => ClientMessage::Stdin(&buf[..n]).encode(),
                    Err(e) => {
                        debug!("local input failed: {e}");
                        input_open = false;
                        ClientMessage::End.encode()
                    }
                };
                if let Err(e) = sink.send(Message::Binary(frame)).await {
                    break Some(Err(SessionError::Transport(e.to_string())));
                }
            }

            geometry = resize.recv(), if resize_open => match geometry {
                Some(geometry) if tty => {
                    let frame = ClientMessage::Resize(geometry).encode();
                    if let Err(e) = sink.send(Message::Binary(frame)).await {
                        break Some(Err(SessionError::Transport(e.to_string())));
                    }
                }
                Some(_) => {}
                None => resize_open = false,
            },

            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(frame))) => match ServerMessage::decode(&frame) {
                    Ok(ServerMessage::Stdout(data)) => deliver(&mut output, &data, "stdout").await,
                    Ok(ServerMessage::Stderr(data)) => deliver(&mut error_output, &data, "stderr").await,
                    Ok(ServerMessage::Pause) => paused = true,
                    Ok(ServerMessage::Resume) => paused = false,
                    Ok(ServerMessage::Stopped { exit_code: 0 }) => break Some(Ok(())),
                    Ok(ServerMessage::Stopped { exit_code }) => {
                        break Some(Err(SessionError::Exited { code: exit_code }));
                    }
                    Ok(ServerMessage::Shutdown) => break Some(Err(SessionError::Shutdown)),
                    Ok(ServerMessage::Error(message)) => break Some(Err(SessionError::Remote(message))),
                    Err(e) => break Some(Err(SessionError::Protocol(e))),
                },
                Some(Ok(Message::Close(_))) | None => break Some(Err(SessionError::Disconnected)),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(Err(SessionError::Transport(e.to_string()))),
            },
        }
    };

    debug!(?outcome, "v1 session ended");
    drop(output);
    drop(error_output);
    if let Some(outcome) = outcome {
        completer.complete(outcome);
    }
    if let Err(e) = sink.close().await {
        warn!("closing v1 socket failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskshell_protocol::TerminalGeometry;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, Url::parse(&format!("ws://{addr}/a/shell.sock")).unwrap())
    }

    #[tokio::test]
    async fn streams_round_trip_and_clean_exit() {
        let (listener, url) = listen().await;
        let (query_tx, query_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = query_tx.send(req.uri().query().unwrap_or_default().to_string());
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
            let (mut tx, mut rx) = ws.split();

            let mut stdin = Vec::new();
            let mut resizes = Vec::new();
            let mut replied = false;
            while let Some(Ok(Message::Binary(frame))) = rx.next().await {
                match frame[0] {
                    v1::STDIN => stdin.extend_from_slice(&frame[1..]),
                    v1::RESIZE => resizes.push(frame[1..].to_vec()),
                    v1::END => break,
                    other => panic!("unexpected client message {other}"),
                }
                if !replied && stdin == b"ls -la\n" && !resizes.is_empty() {
                    replied = true;
                    tx.send(Message::Binary(b"\x01hello\r\n".to_vec())).await.unwrap();
                    tx.send(Message::Binary(b"\x02warning\n".to_vec())).await.unwrap();
                }
            }
            tx.send(Message::Binary(vec![v1::STOPPED, 0])).await.unwrap();
            (stdin, resizes)
        });

        let command = vec!["echo".to_string(), "hi there".to_string()];
        let session = dial(&url, &command, true).await.unwrap();
        let resizer = session.resizer();
        let (mut streams, _, completion) = session.into_parts();

        resizer.resize(TerminalGeometry::new(120, 40));
        streams.input.write_all(b"ls -la\n").await.unwrap();

        let mut greeting = [0u8; 7];
        streams.output.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"hello\r\n");

        streams.input.shutdown().await.unwrap();
        let mut rest = Vec::new();
        streams.output.read_to_end(&mut rest).await.unwrap();
        let mut stderr = Vec::new();
        streams.error_output.read_to_end(&mut stderr).await.unwrap();

        assert_eq!(completion.wait().await, Ok(()));
        assert!(rest.is_empty());
        assert_eq!(stderr, b"warning\n");

        let (stdin, resizes) = server.await.unwrap();
        assert_eq!(stdin, b"ls -la\n");
        assert_eq!(resizes, vec![vec![40, 0, 120, 0]]);

        let query = query_rx.await.unwrap();
        assert_eq!(query, "tty=true&command=echo&command=hi+there");
    }

    #[tokio::test]
    async fn pause_holds_stdin_until_resume() {
        let (listener, url) = listen().await;
        let (typed_tx, typed_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();

            tx.send(Message::Binary(vec![v1::PAUSE])).await.unwrap();
            tx.send(Message::Binary(b"\x01paused".to_vec())).await.unwrap();

            typed_rx.await.unwrap();
            let while_paused =
                tokio::time::timeout(std::time::Duration::from_millis(200), rx.next()).await;

            tx.send(Message::Binary(vec![v1::RESUME])).await.unwrap();
            let after_resume = match rx.next().await {
                Some(Ok(Message::Binary(frame))) => frame,
                other => panic!("expected stdin after resume, got {other:?}"),
            };
            tx.send(Message::Binary(vec![v1::STOPPED, 0])).await.unwrap();
            let _ = rx.next().await;
            (while_paused.is_err(), after_resume)
        });

        let session = dial(&url, &[], false).await.unwrap();
        let (mut streams, _, completion) = session.into_parts();

        // The marker follows the pause, so the driver has seen it by now.
        let mut marker = [0u8; 6];
        streams.output.read_exact(&mut marker).await.unwrap();
        assert_eq!(&marker, b"paused");
        streams.input.write_all(b"typed").await.unwrap();
        typed_tx.send(()).unwrap();

        assert_eq!(completion.wait().await, Ok(()));
        let (silent_while_paused, after_resume) = server.await.unwrap();
        assert!(silent_while_paused, "stdin was forwarded while paused");
        assert_eq!(after_resume, b"\x00typed".to_vec());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_session_error() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Binary(vec![v1::STOPPED, 2])).await.unwrap();
            let _ = ws.next().await;
        });

        let session = dial(&url, &[], false).await.unwrap();
        let (_streams, _, completion) = session.into_parts();
        assert_eq!(completion.wait().await, Err(SessionError::Exited { code: 2 }));
    }

    #[tokio::test]
    async fn remote_error_message_is_reported() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Binary(b"\x66no such container".to_vec()))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let session = dial(&url, &[], false).await.unwrap();
        let (_streams, _, completion) = session.into_parts();
        assert_eq!(
            completion.wait().await,
            Err(SessionError::Remote("no such container".to_string()))
        );
    }

    #[tokio::test]
    async fn closed_socket_before_exit_is_a_disconnect() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let session = dial(&url, &[], false).await.unwrap();
        let (_streams, _, completion) = session.into_parts();
        assert_eq!(completion.wait().await, Err(SessionError::Disconnected));
    }

    #[tokio::test]
    async fn unreachable_socket_fails_to_dial() {
        let (listener, url) = listen().await;
        drop(listener);
        assert!(matches!(
            dial(&url, &[], false).await,
            Err(DialError::Transport(_))
        ));
    }
}
