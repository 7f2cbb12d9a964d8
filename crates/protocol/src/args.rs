//! Argument encoding and decoding.
//!
//! Every argument occupies a whole number of 32-bit words:
//! - `uint`, `int`, `fixed`, `object`, `new_id`: one native-endian word
//! - `string`: length word (including the NUL terminator), bytes, NUL,
//!   zero padding to the next word; a null string is a zero length word
//! - `array`: byte length word, bytes, zero padding
//! - `fd`: nothing in the payload, carried as ancillary data instead

use crate::fixed::Fixed;
use crate::message::{
    DecodeError, HEADER_LEN, MAX_FDS_OUT, MAX_MESSAGE_SIZE, MessageHeader, OutgoingMessage,
    WireError,
};
use crate::object::{ObjectId, raw_or_null};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;

/// Round a byte length up to the next 32-bit boundary.
#[must_use]
pub const fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Encoded size of a string argument, length word included.
#[must_use]
pub const fn string_wire_len(len: usize) -> usize {
    4 + padded_len(len + 1)
}

/// Builder for the payload of one request.
#[derive(Debug, Default)]
pub struct ArgWriter<'a> {
    data: Vec<u8>,
    fds: Vec<BorrowedFd<'a>>,
}

impl<'a> ArgWriter<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_uint(&mut self, value: u32) -> &mut Self {
        self.data.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn put_int(&mut self, value: i32) -> &mut Self {
        self.data.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn put_fixed(&mut self, value: Fixed) -> &mut Self {
        self.put_int(value.to_raw())
    }

    pub fn put_string(&mut self, value: &str) -> &mut Self {
        let len = value.len() + 1;
        self.put_uint(len as u32);
        self.data.extend_from_slice(value.as_bytes());
        // NUL terminator plus padding
        self.data.resize(self.data.len() + padded_len(len) - value.len(), 0);
        self
    }

    /// A nullable string; `None` encodes as a zero length.
    pub fn put_optional_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => self.put_string(s),
            None => self.put_uint(0),
        }
    }

    /// An array of 32-bit integers, prefixed with its length in bytes.
    pub fn put_array(&mut self, values: &[i32]) -> &mut Self {
        self.put_uint((values.len() * 4) as u32);
        for value in values {
            self.data.extend_from_slice(&value.to_ne_bytes());
        }
        self
    }

    /// A raw byte array, padded to the next word.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_uint(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + padded_len(bytes.len()) - bytes.len(), 0);
        self
    }

    pub fn put_object(&mut self, id: Option<ObjectId>) -> &mut Self {
        self.put_uint(raw_or_null(id))
    }

    pub fn put_new_id(&mut self, id: ObjectId) -> &mut Self {
        self.put_uint(id.get())
    }

    /// Attach a descriptor; the kernel duplicates it into the receiver.
    pub fn put_fd(&mut self, fd: BorrowedFd<'a>) -> &mut Self {
        self.fds.push(fd);
        self
    }

    /// Payload bytes written so far.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Prepend the header and produce the frame.
    pub fn finish(self, object_id: ObjectId, opcode: u16) -> Result<OutgoingMessage<'a>, WireError> {
        let size = HEADER_LEN + self.data.len();
        if size > MAX_MESSAGE_SIZE {
            return Err(WireError::MessageTooLarge { size });
        }
        if self.fds.len() > MAX_FDS_OUT {
            return Err(WireError::TooManyFds {
                count: self.fds.len(),
            });
        }

        let header = MessageHeader {
            object_id: object_id.get(),
            opcode,
            size: size as u16,
        };
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&self.data);

        Ok(OutgoingMessage {
            header,
            bytes,
            fds: self.fds,
        })
    }
}

/// Received descriptors waiting to be claimed, in arrival order.
///
/// Descriptors are not bound to the frame whose `recvmsg` carried them: a
/// sender may batch several frames into one call and the kernel attaches all
/// of their descriptors to its first byte. Readers share one queue per
/// connection and each `fd` argument pops the oldest entry.
#[derive(Debug, Clone, Default)]
pub struct FdQueue {
    fds: Arc<Mutex<VecDeque<OwnedFd>>>,
}

impl FdQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fd: OwnedFd) {
        self.fds.lock().push_back(fd);
    }

    pub fn pop(&self) -> Option<OwnedFd> {
        self.fds.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.lock().is_empty()
    }
}

impl From<Vec<OwnedFd>> for FdQueue {
    fn from(fds: Vec<OwnedFd>) -> Self {
        Self {
            fds: Arc::new(Mutex::new(fds.into())),
        }
    }
}

/// Cursor over the payload of one event.
///
/// Reads are sequential; the cursor never panics on malformed input.
#[derive(Debug)]
pub struct ArgReader {
    data: Vec<u8>,
    pos: usize,
    fds: FdQueue,
}

impl ArgReader {
    /// A reader over `data` with its own descriptors.
    #[must_use]
    pub fn new(data: Vec<u8>, fds: Vec<OwnedFd>) -> Self {
        Self::with_queue(data, fds.into())
    }

    /// A reader over `data` that claims descriptors from a shared queue.
    #[must_use]
    pub fn with_queue(data: Vec<u8>, fds: FdQueue) -> Self {
        Self { data, pos: 0, fds }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Descriptors received on the connection and not yet claimed by any
    /// event, this one included.
    #[must_use]
    pub fn remaining_fds(&self) -> usize {
        self.fds.len()
    }

    fn take(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    fn take_word(&mut self) -> Result<[u8; 4], DecodeError> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn next_uint(&mut self) -> Result<u32, DecodeError> {
        self.take_word().map(u32::from_ne_bytes)
    }

    pub fn next_int(&mut self) -> Result<i32, DecodeError> {
        self.take_word().map(i32::from_ne_bytes)
    }

    pub fn next_fixed(&mut self) -> Result<Fixed, DecodeError> {
        self.next_int().map(Fixed::from_raw)
    }

    /// A non-nullable string.
    pub fn next_string(&mut self) -> Result<String, DecodeError> {
        self.next_optional_string()?
            .ok_or(DecodeError::UnexpectedNull { what: "string" })
    }

    pub fn next_optional_string(&mut self) -> Result<Option<String>, DecodeError> {
        let len = self.next_uint()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let bytes = self.take(padded_len(len))?;
        let (content, terminator) = bytes[..len].split_at(len - 1);
        if terminator[0] != 0 {
            return Err(DecodeError::MissingNul);
        }
        let s = std::str::from_utf8(content).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Some(s.to_owned()))
    }

    /// An array of 32-bit integers; the element count is the byte length / 4.
    pub fn next_array(&mut self) -> Result<Vec<i32>, DecodeError> {
        let len = self.next_uint()? as usize;
        if len % 4 != 0 {
            return Err(DecodeError::MisalignedArray { len });
        }
        let bytes = self.take(len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// A raw byte array.
    pub fn next_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.next_uint()? as usize;
        let bytes = self.take(padded_len(len))?;
        Ok(bytes[..len].to_vec())
    }

    pub fn next_object(&mut self) -> Result<Option<ObjectId>, DecodeError> {
        self.next_uint().map(ObjectId::new)
    }

    pub fn next_new_id(&mut self) -> Result<ObjectId, DecodeError> {
        self.next_object()?
            .ok_or(DecodeError::UnexpectedNull { what: "new_id" })
    }

    /// Take ownership of the next received descriptor.
    pub fn next_fd(&mut self) -> Result<OwnedFd, DecodeError> {
        self.fds.pop().ok_or(DecodeError::MissingFd)
    }
}
