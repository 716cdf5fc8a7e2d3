pub mod command;
pub mod v1;
pub mod v2;

use std::fmt;
use thiserror::Error;
use url::Url;

/// Query parameter of the redirect target that carries the version tag.
pub const VERSION_PARAM: &str = "v";

/// Query parameter of the redirect target that carries the socket address.
pub const SOCKET_URL_PARAM: &str = "socketUrl";

/// Wire protocol spoken by the remote shell endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    /// Parse the version tag found in the redirect query. Only `"1"` and
    /// `"2"` are recognised.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "1" => Some(Self::V1),
            "2" => Some(Self::V2),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
        }
    }

    /// Command to run when the caller supplied none. V2 endpoints pick their
    /// own default, so only V1 carries one.
    pub fn default_command(self) -> Option<Vec<String>> {
        match self {
            Self::V1 => Some(command::v1_bootstrap()),
            Self::V2 => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.tag())
    }
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    pub columns: u16,
    pub rows: u16,
}

impl TerminalGeometry {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }
}

impl fmt::Display for TerminalGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Where and how to connect to a task's interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub protocol_version: ProtocolVersion,
    pub socket_address: Url,
    pub default_command: Option<Vec<String>>,
}

impl EndpointDescriptor {
    pub fn new(protocol_version: ProtocolVersion, socket_address: Url) -> Self {
        Self {
            protocol_version,
            socket_address,
            default_command: protocol_version.default_command(),
        }
    }

    /// Build a descriptor from the target of the shell artifact redirect.
    ///
    /// The version tag and the socket address are both taken from the query
    /// string; an unknown tag is rejected rather than guessed.
    pub fn from_redirect(redirect: &Url) -> Result<Self, RedirectError> {
        let mut tag = None;
        let mut socket = None;
        for (key, value) in redirect.query_pairs() {
            match key.as_ref() {
                VERSION_PARAM if tag.is_none() => tag = Some(value.into_owned()),
                SOCKET_URL_PARAM if socket.is_none() => socket = Some(value.into_owned()),
                _ => {}
            }
        }

        let tag = tag.ok_or(RedirectError::MissingVersion)?;
        let version =
            ProtocolVersion::from_tag(&tag).ok_or(RedirectError::UnknownVersion(tag))?;
        let socket = socket.ok_or(RedirectError::MissingSocketUrl)?;
        let socket_address = Url::parse(&socket).map_err(|e| RedirectError::InvalidSocketUrl {
            value: socket,
            reason: e.to_string(),
        })?;

        Ok(Self::new(version, socket_address))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedirectError {
    #[error("redirect carries no shell version")]
    MissingVersion,

    #[error("unknown shell version {0:?}")]
    UnknownVersion(String),

    #[error("redirect carries no socket url")]
    MissingSocketUrl,

    #[error("invalid socket url {value:?}: {reason}")]
    InvalidSocketUrl { value: String, reason: String },
}

/// Failure to decode a binary frame received from a shell endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("unknown stream {0}")]
    UnknownStream(u8),

    #[error("truncated {kind} frame ({len} bytes)")]
    Truncated { kind: &'static str, len: usize },
}

/// Append `tty` and repeated `command` parameters to a socket address.
pub(crate) fn with_command_query(base: &Url, command: &[String], tty: bool) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("tty", if tty { "true" } else { "false" });
        for arg in command {
            query.append_pair("command", arg);
        }
    }
    url
}
