//! Error types for connection operations.

use std::fmt;
use thiserror::Error;
use waylink_protocol::{DecodeError, ObjectId, SocketPathError, WireError};

/// Error type for connection operations.
///
/// Everything except [`Error::NotRegistered`], [`Error::AlreadyRegistered`],
/// [`Error::IdInUse`] and [`Error::IdsExhausted`] is fatal for the
/// connection: once returned, the connection is closed.
#[derive(Debug, Error)]
pub enum Error {
    /// The socket path could not be determined.
    #[error("configuration error: {0}")]
    Config(#[from] SocketPathError),

    /// Socket error other than end-of-stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be framed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// An event payload was malformed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The peer closed the stream in the middle of a frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The socket accepted only part of a request.
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite { expected: usize, written: usize },

    /// More descriptors arrived than the control buffer could hold.
    #[error("ancillary data truncated, file descriptors were lost")]
    ControlTruncated,

    /// An event handler panicked while the event was being routed.
    #[error("event handler panicked")]
    HandlerPanicked,

    /// The server reported a fatal protocol error.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// No client-side object ids remain.
    #[error("client object ids exhausted")]
    IdsExhausted,

    /// The proxy has not been registered with a connection.
    #[error("{interface} proxy is not registered")]
    NotRegistered { interface: &'static str },

    /// The proxy already carries an id.
    #[error("{interface} proxy is already registered as {id}")]
    AlreadyRegistered {
        interface: &'static str,
        id: ObjectId,
    },

    /// A server-allocated id collides with a live object.
    #[error("object id {id} is already in use")]
    IdInUse { id: ObjectId },

    /// The display proxy must own id 1.
    #[error("display must be the first registered object, got id {id}")]
    DisplayNotFirst { id: ObjectId },

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// Fatal error reported by the server through the display's `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Object the error is about.
    pub object_id: Option<ObjectId>,
    /// Interface-specific error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object_id {
            Some(id) => write!(f, "object {id}, code {}: {}", self.code, self.message),
            None => write!(f, "code {}: {}", self.code, self.message),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
