//! waylink - client side of a Wayland-style object protocol.
//!
//! A client talks to a display server over one Unix stream socket. Every
//! object on the connection is a [`Proxy`] registered in the connection's
//! object table; requests are encoded with [`ArgWriter`] and sent through
//! the [`Connection`], and events come back through a per-connection
//! dispatch thread that routes each frame to its proxy's [`EventHandler`].
//!
//! # Architecture
//!
//! ```text
//! caller threads                         dispatch thread
//! ──────────────                         ───────────────
//! send_request ──► Mutex<socket> ──►     (sole reader)
//! dispatch()   ──► ticket ──────────────► read frame
//!                                         lookup proxy
//!              ◄── outcome ◄────────────  handle_event
//! ```
//!
//! File descriptors travel alongside messages as `SCM_RIGHTS` ancillary
//! data. [`Display`] wraps a connection with the core objects: `sync`,
//! `get_registry` and [`Display::roundtrip`].
//!
//! # Logging
//!
//! Lifecycle events are logged at `debug`, routing misses at `warn`, fatal
//! errors at `error`, and every frame sent or received at `trace`.

mod callback;
mod connection;
mod dispatch;
mod display;
mod error;
mod objects;
mod proxy;
mod registry;
mod transport;

#[cfg(test)]
mod mock;

pub use callback::Callback;
pub use connection::Connection;
pub use dispatch::DispatchOutcome;
pub use display::Display;
pub use error::{Error, ProtocolError, Result};
pub use proxy::{Event, EventHandler, Proxy, ProxyBase};
pub use registry::{Global, Registry, RegistryEvent};

// Wire types callers need to write their own proxies
pub use waylink_protocol::{
    ArgReader, ArgWriter, DecodeError, Fixed, MAX_FDS_OUT, MAX_MESSAGE_SIZE, ObjectId,
    SocketPathError, WireError,
};

/// Interface names and opcodes of the core objects.
pub mod interfaces {
    pub mod display {
        pub use crate::display::{INTERFACE, event, request};
    }
    pub mod callback {
        pub use crate::callback::{INTERFACE, event};
    }
    pub mod registry {
        pub use crate::registry::{INTERFACE, event, request};
    }
}
