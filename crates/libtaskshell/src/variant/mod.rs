//! Concrete session transports, one per protocol version.

mod v1;
mod v2;

use async_trait::async_trait;
use taskshell_protocol::{EndpointDescriptor, ProtocolVersion};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::DialError;
use crate::session::Session;

/// Bytes read from local input per frame.
const READ_CHUNK: usize = 8 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establishes a [`Session`] against a resolved endpoint.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        endpoint: &EndpointDescriptor,
        command: &[String],
        tty: bool,
    ) -> Result<Session, DialError>;
}

/// Picks the transport matching the endpoint's protocol version.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolDialer;

#[async_trait]
impl Dialer for ProtocolDialer {
    async fn dial(
        &self,
        endpoint: &EndpointDescriptor,
        command: &[String],
        tty: bool,
    ) -> Result<Session, DialError> {
        match endpoint.protocol_version {
            ProtocolVersion::V1 => v1::dial(&endpoint.socket_address, command, tty).await,
            ProtocolVersion::V2 => v2::dial(&endpoint.socket_address, command, tty).await,
        }
    }
}

async fn connect(url: &Url) -> Result<WsStream, DialError> {
    debug!(host = url.host_str().unwrap_or_default(), "dialing shell socket");
    let (ws, response) = connect_async(url.as_str()).await?;
    debug!(status = %response.status(), "shell socket connected");
    Ok(ws)
}

/// Write remote output to the local side. A local reader that went away
/// closes that direction only.
async fn deliver(sink: &mut Option<DuplexStream>, data: &[u8], stream: &'static str) {
    let Some(writer) = sink.as_mut() else {
        return;
    };
    if let Err(e) = writer.write_all(data).await {
        debug!(stream, "local reader gone: {e}");
        *sink = None;
    }
}
