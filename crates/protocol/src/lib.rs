//! waylink wire codec - the binary message format shared by every protocol
//! object on a connection.
//!
//! This crate provides:
//! - [`MessageHeader`] framing and the [`OutgoingMessage`] a request encodes to
//! - [`ArgWriter`] / [`ArgReader`] for the primitive argument types
//! - [`FdQueue`], the per-connection queue of received descriptors
//! - [`Fixed`] 24.8 fixed-point numbers and [`ObjectId`] identifiers
//! - Socket path resolution via [`resolve_socket_path`]
//!
//! # Wire Format
//!
//! Every frame is an 8-byte header followed by a payload, both a multiple of
//! four bytes long. Integers use the host's native byte order: both ends
//! always run on the same machine. File descriptors never appear in the
//! payload; they travel as `SCM_RIGHTS` ancillary data.
//!
//! # Example
//!
//! ```rust
//! use waylink_protocol::{ArgReader, ArgWriter, MessageHeader, ObjectId};
//!
//! let mut args = ArgWriter::new();
//! args.put_string("wl_compositor").put_uint(4);
//! let msg = args.finish(ObjectId::DISPLAY, 1).unwrap();
//!
//! let header = MessageHeader::parse(msg.bytes[..8].try_into().unwrap());
//! assert_eq!(usize::from(header.size), msg.bytes.len());
//!
//! let mut reader = ArgReader::new(msg.bytes[8..].to_vec(), Vec::new());
//! assert_eq!(reader.next_string().unwrap(), "wl_compositor");
//! assert_eq!(reader.next_uint().unwrap(), 4);
//! ```

mod args;
mod fixed;
mod message;
mod object;
mod socket;

// Re-export main types at crate root
pub use args::{ArgReader, ArgWriter, FdQueue, padded_len, string_wire_len};
pub use fixed::Fixed;
pub use message::{
    DecodeError, HEADER_LEN, MAX_FDS_OUT, MAX_MESSAGE_SIZE, MessageHeader, OutgoingMessage,
    WireError,
};
pub use object::{ObjectId, raw_or_null};
pub use socket::{
    DEFAULT_DISPLAY, DISPLAY_ENV, RUNTIME_DIR_ENV, SOCKET_FD_ENV, SocketPathError,
    inherited_socket_fd, resolve_socket_path, socket_path_from,
};
