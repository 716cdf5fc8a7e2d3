//! Frames of the version 2 shell protocol.
//!
//! Frames are `[type][...]`. Data frames name one of three streams and an
//! empty data payload closes that stream. Each side acknowledges the bytes it
//! consumed so the sender can bound what it has in flight.

use url::Url;

use crate::{FrameError, TerminalGeometry};

pub const TYPE_DATA: u8 = 0;
pub const TYPE_ACK: u8 = 1;
pub const TYPE_WINDOW_SIZE: u8 = 2;
pub const TYPE_EXIT: u8 = 3;

/// Upper bound on un-acknowledged stdin bytes.
pub const MAX_IN_FLIGHT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub fn id(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, FrameError> {
        match id {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(FrameError::UnknownStream(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data { stream: Stream, payload: Vec<u8> },
    Ack { stream: Stream, size: u32 },
    WindowSize(TerminalGeometry),
    Exit { success: bool },
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data { stream, payload } => {
                let mut frame = Vec::with_capacity(payload.len() + 2);
                frame.push(TYPE_DATA);
                frame.push(stream.id());
                frame.extend_from_slice(payload);
                frame
            }
            Self::Ack { stream, size } => {
                let mut frame = Vec::with_capacity(6);
                frame.push(TYPE_ACK);
                frame.push(stream.id());
                frame.extend_from_slice(&size.to_be_bytes());
                frame
            }
            Self::WindowSize(geometry) => {
                let mut frame = Vec::with_capacity(5);
                frame.push(TYPE_WINDOW_SIZE);
                frame.extend_from_slice(&geometry.columns.to_be_bytes());
                frame.extend_from_slice(&geometry.rows.to_be_bytes());
                frame
            }
            Self::Exit { success } => vec![TYPE_EXIT, if *success { 0 } else { 1 }],
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let (&kind, body) = frame.split_first().ok_or(FrameError::Empty)?;
        let truncated = |kind| FrameError::Truncated {
            kind,
            len: frame.len(),
        };
        match kind {
            TYPE_DATA => {
                let (&stream, payload) = body.split_first().ok_or_else(|| truncated("data"))?;
                Ok(Self::Data {
                    stream: Stream::from_id(stream)?,
                    payload: payload.to_vec(),
                })
            }
            TYPE_ACK => {
                if body.len() < 5 {
                    return Err(truncated("ack"));
                }
                let size = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
                Ok(Self::Ack {
                    stream: Stream::from_id(body[0])?,
                    size,
                })
            }
            TYPE_WINDOW_SIZE => {
                if body.len() < 4 {
                    return Err(truncated("window size"));
                }
                Ok(Self::WindowSize(TerminalGeometry {
                    columns: u16::from_be_bytes([body[0], body[1]]),
                    rows: u16::from_be_bytes([body[2], body[3]]),
                }))
            }
            TYPE_EXIT => {
                let &status = body.first().ok_or_else(|| truncated("exit"))?;
                Ok(Self::Exit {
                    success: status == 0,
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Socket address with the tty flag and, when given, command arguments.
pub fn socket_url(base: &Url, command: &[String], tty: bool) -> Url {
    crate::with_command_query(base, command, tty)
}
