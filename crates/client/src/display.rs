//! `wl_display`: the connection's root object, always id 1.

use crate::callback::Callback;
use crate::connection::Connection;
use crate::dispatch::DispatchOutcome;
use crate::error::{Error, ProtocolError, Result};
use crate::proxy::{Event, EventHandler, Proxy, ProxyBase};
use crate::registry::Registry;
use std::sync::Arc;
use waylink_protocol::{ArgWriter, DecodeError, ObjectId, raw_or_null};

pub const INTERFACE: &str = "wl_display";

/// Request opcodes
pub mod request {
    pub const SYNC: u16 = 0;
    pub const GET_REGISTRY: u16 = 1;
}

/// Event opcodes
pub mod event {
    pub const ERROR: u16 = 0;
    pub const DELETE_ID: u16 = 1;
}

#[derive(Default)]
struct DisplayProxy {
    base: ProxyBase,
}

impl Proxy for DisplayProxy {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        INTERFACE
    }

    fn as_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

impl EventHandler for DisplayProxy {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError> {
        match event.opcode() {
            event::ERROR => {
                let err = ProtocolError {
                    object_id: event.next_object()?,
                    code: event.next_uint()?,
                    message: event.next_string()?,
                };
                tracing::error!(
                    object_id = raw_or_null(err.object_id),
                    code = err.code,
                    message = %err.message,
                    "Protocol error from server"
                );
                if let Some(connection) = self.connection() {
                    connection.inner().set_protocol_error(err);
                }
                Ok(())
            }
            event::DELETE_ID => {
                let raw = event.next_uint()?;
                let Some(id) = ObjectId::new(raw) else {
                    tracing::warn!("delete_id for null object");
                    return Ok(());
                };
                if let Some(connection) = self.connection() {
                    if connection.unregister_id(id).is_none() {
                        tracing::debug!(object_id = raw, "delete_id for unknown object");
                    }
                }
                Ok(())
            }
            _ => Err(event.unknown_opcode(INTERFACE)),
        }
    }
}

/// Client side of a display server connection.
///
/// Owns the [`Connection`] together with the display proxy registered at
/// id 1, and provides the core requests every client starts with.
///
/// ```no_run
/// use waylink::Display;
///
/// let display = Display::connect(None)?;
/// let registry = display.get_registry()?;
/// display.roundtrip()?;
/// for global in registry.globals() {
///     println!("{} {} v{}", global.name, global.interface, global.version);
/// }
/// # Ok::<(), waylink::Error>(())
/// ```
pub struct Display {
    connection: Connection,
    proxy: Arc<DisplayProxy>,
}

impl Display {
    /// Connect by socket name; see [`Connection::connect`].
    pub fn connect(name: Option<&str>) -> Result<Self> {
        Self::from_connection(Connection::connect(name)?)
    }

    /// Connect honouring `WAYLAND_SOCKET`; see [`Connection::connect_env`].
    pub fn connect_env() -> Result<Self> {
        Self::from_connection(Connection::connect_env()?)
    }

    /// Register the display proxy on a fresh connection.
    ///
    /// Fails with [`Error::DisplayNotFirst`] if any object was registered on
    /// `connection` before.
    pub fn from_connection(connection: Connection) -> Result<Self> {
        let proxy = Arc::new(DisplayProxy::default());
        let id = connection.register(Arc::clone(&proxy))?;
        if id != ObjectId::DISPLAY {
            connection.unregister_id(id);
            return Err(Error::DisplayNotFirst { id });
        }
        Ok(Self { connection, proxy })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Ask the server for a callback that fires once every earlier request
    /// has been processed.
    pub fn sync(&self) -> Result<Arc<Callback>> {
        let callback = Arc::new(Callback::new());
        let id = self.connection.register(Arc::clone(&callback))?;

        let mut args = ArgWriter::new();
        args.put_new_id(id);
        self.connection
            .send_request(self.proxy.as_ref(), request::SYNC, args)?;
        Ok(callback)
    }

    /// Create the registry. The server answers with one `global` event per
    /// global object.
    pub fn get_registry(&self) -> Result<Arc<Registry>> {
        let registry = Arc::new(Registry::new());
        let id = self.connection.register(Arc::clone(&registry))?;

        let mut args = ArgWriter::new();
        args.put_new_id(id);
        self.connection
            .send_request(self.proxy.as_ref(), request::GET_REGISTRY, args)?;
        Ok(registry)
    }

    /// Block until the server has processed every request sent so far.
    ///
    /// Events arriving in the meantime are routed as usual. Returns the
    /// serial of the `done` event, [`Error::Protocol`] if the server reports
    /// an error, or [`Error::Closed`] if the connection ends first.
    pub fn roundtrip(&self) -> Result<u32> {
        let callback = self.sync()?;
        self.connection.dispatch_until(|| callback.is_done())?;
        callback.serial().ok_or(Error::Closed)
    }

    pub fn dispatch(&self) -> Result<DispatchOutcome> {
        self.connection.dispatch()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    #[must_use]
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        self.connection.protocol_error()
    }
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("connection", &self.connection)
            .finish()
    }
}
