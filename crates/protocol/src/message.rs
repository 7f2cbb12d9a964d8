//! Message framing: the 8-byte header shared by requests and events, and the
//! error types produced while encoding or decoding a frame.

use crate::object::ObjectId;
use std::os::fd::BorrowedFd;
use thiserror::Error;

/// Size of a message header in bytes.
///
/// The header is two 32-bit words:
/// - object id
/// - `(size << 16) | opcode`
pub const HEADER_LEN: usize = 8;

/// Largest frame either side will put on the wire.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Most file descriptors a single frame may carry as ancillary data.
pub const MAX_FDS_OUT: usize = 28;

/// Error produced while building or framing a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Declared frame size is below the header length or not 4-byte aligned.
    #[error("invalid frame size {size}")]
    InvalidSize { size: u16 },

    /// Encoded frame would not fit the 16-bit size field.
    #[error("message of {size} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    MessageTooLarge { size: usize },

    /// More descriptors were attached than one frame can carry.
    #[error("{count} file descriptors attached, at most {MAX_FDS_OUT} allowed")]
    TooManyFds { count: usize },
}

/// Error produced while reading arguments out of an event payload.
///
/// Any of these means the byte stream can no longer be trusted, so the
/// connection treats them as fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Argument extends beyond the end of the payload.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string argument is missing its NUL terminator.
    #[error("string argument is not NUL terminated")]
    MissingNul,

    /// A string argument is not valid UTF-8.
    #[error("string argument is not valid UTF-8")]
    InvalidUtf8,

    /// A non-nullable string or object argument was null.
    #[error("unexpected null {what} argument")]
    UnexpectedNull { what: &'static str },

    /// An `int` array whose byte length is not a multiple of 4.
    #[error("array of {len} bytes is not a whole number of 32-bit elements")]
    MisalignedArray { len: usize },

    /// The frame promised a file descriptor that never arrived.
    #[error("expected a file descriptor but none was received")]
    MissingFd,

    /// The handler does not know this opcode.
    #[error("unknown opcode {opcode} for {interface}")]
    UnknownOpcode {
        interface: &'static str,
        opcode: u16,
    },
}

/// Header of a single request or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Object the request targets or the event originates from.
    pub object_id: u32,
    /// Request or event number within the object's interface.
    pub opcode: u16,
    /// Total frame length, header included.
    pub size: u16,
}

impl MessageHeader {
    /// Parse a header from its wire form.
    #[must_use]
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        let object_id = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let word = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);

        Self {
            object_id,
            opcode: (word & 0xffff) as u16,
            size: (word >> 16) as u16,
        }
    }

    /// Serialize the header to its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let word = (u32::from(self.size) << 16) | u32::from(self.opcode);
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.object_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&word.to_ne_bytes());
        buf
    }

    /// Check the size invariants every frame must satisfy.
    pub fn validate(&self) -> Result<(), WireError> {
        let size = usize::from(self.size);
        if size < HEADER_LEN || size % 4 != 0 {
            return Err(WireError::InvalidSize { size: self.size });
        }
        Ok(())
    }

    /// Length of the payload following the header.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.size).saturating_sub(HEADER_LEN)
    }
}

/// A fully encoded request ready to hand to the socket.
///
/// `bytes` holds header and payload; `fds` travel as `SCM_RIGHTS` ancillary
/// data in the same `sendmsg` call.
#[derive(Debug)]
pub struct OutgoingMessage<'a> {
    pub header: MessageHeader,
    pub bytes: Vec<u8>,
    pub fds: Vec<BorrowedFd<'a>>,
}

impl OutgoingMessage<'_> {
    /// Object the request targets.
    #[must_use]
    pub fn target(&self) -> Option<ObjectId> {
        ObjectId::new(self.header.object_id)
    }
}
