//! Frames of the version 1 (docker-exec) shell protocol.
//!
//! Every binary message starts with a single code byte followed by the
//! payload. There is no flow control beyond the remote asking the client to
//! pause and resume standard input.

use url::Url;

use crate::{FrameError, TerminalGeometry};

pub const STDIN: u8 = 0;
pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;
pub const RESIZE: u8 = 3;
pub const PAUSE: u8 = 4;
pub const RESUME: u8 = 5;
pub const END: u8 = 6;
pub const STOPPED: u8 = 100;
pub const SHUTDOWN: u8 = 101;
pub const ERROR: u8 = 102;

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    Stdin(&'a [u8]),
    Resize(TerminalGeometry),
    End,
}

impl ClientMessage<'_> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Stdin(data) => {
                let mut frame = Vec::with_capacity(data.len() + 1);
                frame.push(STDIN);
                frame.extend_from_slice(data);
                frame
            }
            // Rows first, then columns, little-endian.
            Self::Resize(geometry) => {
                let mut frame = Vec::with_capacity(5);
                frame.push(RESIZE);
                frame.extend_from_slice(&geometry.rows.to_le_bytes());
                frame.extend_from_slice(&geometry.columns.to_le_bytes());
                frame
            }
            Self::End => vec![END],
        }
    }
}

/// Messages the remote sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Pause,
    Resume,
    Stopped { exit_code: i32 },
    Shutdown,
    Error(String),
}

impl ServerMessage {
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let (&code, payload) = frame.split_first().ok_or(FrameError::Empty)?;
        match code {
            STDOUT => Ok(Self::Stdout(payload.to_vec())),
            STDERR => Ok(Self::Stderr(payload.to_vec())),
            PAUSE => Ok(Self::Pause),
            RESUME => Ok(Self::Resume),
            STOPPED => {
                let &exit_code = payload.first().ok_or(FrameError::Truncated {
                    kind: "stopped",
                    len: frame.len(),
                })?;
                Ok(Self::Stopped {
                    exit_code: i32::from(exit_code),
                })
            }
            SHUTDOWN => Ok(Self::Shutdown),
            ERROR => Ok(Self::Error(String::from_utf8_lossy(payload).into_owned())),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Socket address with the tty flag and command arguments attached.
pub fn socket_url(base: &Url, command: &[String], tty: bool) -> Url {
    crate::with_command_query(base, command, tty)
}
