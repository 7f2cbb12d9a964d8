//! Local handles for remote objects.

use crate::connection::{Connection, Inner};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock, Weak};
use waylink_protocol::{ArgReader, DecodeError, ObjectId};

/// State every proxy embeds: its id and its owning connection.
///
/// Both are stamped once, when the proxy is registered. The connection
/// reference is weak; the connection's object table owns the proxy.
#[derive(Default)]
pub struct ProxyBase {
    id: OnceLock<ObjectId>,
    connection: OnceLock<Weak<Inner>>,
}

impl ProxyBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The assigned id, or `None` before registration.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        self.id.get().copied()
    }

    /// The owning connection, if registered and still alive.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.connection
            .get()
            .and_then(Weak::upgrade)
            .map(Connection::from_inner)
    }

    /// Stamp id and connection. Fails if the proxy was already registered.
    pub(crate) fn attach(&self, id: ObjectId, connection: Weak<Inner>) -> Result<(), ObjectId> {
        if let Some(existing) = self.id() {
            return Err(existing);
        }
        self.id.set(id).map_err(|_| id)?;
        let _ = self.connection.set(connection);
        Ok(())
    }
}

impl fmt::Debug for ProxyBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyBase").field("id", &self.id()).finish()
    }
}

/// A local handle standing in for a remote object.
pub trait Proxy: Send + Sync + 'static {
    fn base(&self) -> &ProxyBase;

    /// Protocol interface name, used in logs and errors.
    fn interface(&self) -> &'static str;

    /// Event-handling capability. Proxies that never receive events keep the
    /// default; events addressed to them are dropped.
    fn as_handler(&self) -> Option<&dyn EventHandler> {
        None
    }

    fn id(&self) -> Option<ObjectId> {
        self.base().id()
    }

    fn connection(&self) -> Option<Connection> {
        self.base().connection()
    }
}

/// Receives decoded events for one proxy, typically switching on the opcode.
///
/// Runs on the dispatch thread. Returning an error closes the connection.
pub trait EventHandler {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError>;
}

/// One inbound event: sender, opcode, and a cursor over its arguments.
///
/// Derefs to [`ArgReader`], so handlers read arguments directly with
/// `event.next_uint()` and friends.
#[derive(Debug)]
pub struct Event {
    sender: ObjectId,
    opcode: u16,
    args: ArgReader,
}

impl Event {
    #[must_use]
    pub fn new(sender: ObjectId, opcode: u16, args: ArgReader) -> Self {
        Self {
            sender,
            opcode,
            args,
        }
    }

    #[must_use]
    pub fn sender(&self) -> ObjectId {
        self.sender
    }

    #[must_use]
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Read an object argument and resolve it against `connection`.
    ///
    /// A null reference and a reference to an object that no longer exists
    /// both yield `None`.
    pub fn next_proxy(
        &mut self,
        connection: &Connection,
    ) -> Result<Option<Arc<dyn Proxy>>, DecodeError> {
        Ok(self
            .args
            .next_object()?
            .and_then(|id| connection.lookup(id)))
    }

    /// Build the error for an opcode the handler does not know.
    #[must_use]
    pub fn unknown_opcode(&self, interface: &'static str) -> DecodeError {
        DecodeError::UnknownOpcode {
            interface,
            opcode: self.opcode,
        }
    }
}

impl Deref for Event {
    type Target = ArgReader;

    fn deref(&self) -> &ArgReader {
        &self.args
    }
}

impl DerefMut for Event {
    fn deref_mut(&mut self) -> &mut ArgReader {
        &mut self.args
    }
}
