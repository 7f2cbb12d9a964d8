//! `wl_registry`: the server's list of global objects.

use crate::error::{Error, Result};
use crate::proxy::{Event, EventHandler, Proxy, ProxyBase};
use parking_lot::Mutex;
use std::sync::Arc;
use waylink_protocol::{ArgWriter, DecodeError, ObjectId};

pub const INTERFACE: &str = "wl_registry";

/// Request opcodes
pub mod request {
    pub const BIND: u16 = 0;
}

/// Event opcodes
pub mod event {
    pub const GLOBAL: u16 = 0;
    pub const GLOBAL_REMOVE: u16 = 1;
}

/// A global object advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Numeric name, unique for the lifetime of the server
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Global(Global),
    GlobalRemove { name: u32 },
}

type Listener = Box<dyn FnMut(&RegistryEvent) + Send>;

#[derive(Default)]
pub struct Registry {
    base: ProxyBase,
    globals: Mutex<Vec<Global>>,
    listener: Mutex<Option<Listener>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the globals currently advertised.
    #[must_use]
    pub fn globals(&self) -> Vec<Global> {
        self.globals.lock().clone()
    }

    /// First global implementing `interface`.
    #[must_use]
    pub fn find(&self, interface: &str) -> Option<Global> {
        self.globals
            .lock()
            .iter()
            .find(|g| g.interface == interface)
            .cloned()
    }

    /// Replace the listener notified of `global` and `global_remove`.
    pub fn set_listener(&self, listener: impl FnMut(&RegistryEvent) + Send + 'static) {
        *self.listener.lock() = Some(Box::new(listener));
    }

    pub fn clear_listener(&self) {
        self.listener.lock().take();
    }

    /// Bind `proxy` to the global `name`.
    ///
    /// `proxy` is registered first so that events the server sends right
    /// after the bind already have somewhere to go.
    pub fn bind<P: Proxy>(&self, name: u32, version: u32, proxy: Arc<P>) -> Result<ObjectId> {
        let connection = self.connection().ok_or(Error::Closed)?;
        let interface = proxy.interface();
        let id = connection.register(proxy)?;

        let mut args = ArgWriter::new();
        args.put_uint(name)
            .put_string(interface)
            .put_uint(version)
            .put_new_id(id);
        connection.send_request(self, request::BIND, args)?;

        tracing::debug!(
            name = name,
            interface = interface,
            version = version,
            object_id = id.get(),
            "Bound global"
        );
        Ok(id)
    }

    fn notify(&self, event: RegistryEvent) {
        // the listener runs unlocked so it may replace itself
        let Some(mut listener) = self.listener.lock().take() else {
            return;
        };
        listener(&event);

        let mut slot = self.listener.lock();
        if slot.is_none() {
            *slot = Some(listener);
        }
    }
}

impl Proxy for Registry {
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

impl EventHandler for Registry {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError> {
        match event.opcode() {
            event::GLOBAL => {
                let global = Global {
                    name: event.next_uint()?,
                    interface: event.next_string()?,
                    version: event.next_uint()?,
                };
                tracing::trace!(
                    name = global.name,
                    interface = %global.interface,
                    version = global.version,
                    "Global added"
                );

                {
                    let mut globals = self.globals.lock();
                    globals.retain(|g| g.name != global.name);
                    globals.push(global.clone());
                }
                self.notify(RegistryEvent::Global(global));
                Ok(())
            }
            event::GLOBAL_REMOVE => {
                let name = event.next_uint()?;
                tracing::trace!(name = name, "Global removed");

                self.globals.lock().retain(|g| g.name != name);
                self.notify(RegistryEvent::GlobalRemove { name });
                Ok(())
            }
            _ => Err(event.unknown_opcode(INTERFACE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waylink_protocol::ArgReader;

    fn event(opcode: u16, build: impl FnOnce(&mut ArgWriter<'_>)) -> Event {
        let mut args = ArgWriter::new();
        build(&mut args);
        Event::new(
            ObjectId::new(2).unwrap(),
            opcode,
            ArgReader::new(args.payload().to_vec(), Vec::new()),
        )
    }

    fn global(registry: &Registry, name: u32, interface: &str, version: u32) {
        let mut e = event(event::GLOBAL, |a| {
            a.put_uint(name).put_string(interface).put_uint(version);
        });
        registry.handle_event(&mut e).unwrap();
    }

    #[test]
    fn test_globals_tracked() {
        let registry = Registry::new();
        global(&registry, 1, "wl_compositor", 6);
        global(&registry, 2, "wl_shm", 1);
        global(&registry, 3, "wl_seat", 9);

        assert_eq!(registry.globals().len(), 3);
        assert_eq!(registry.find("wl_shm").map(|g| g.name), Some(2));

        let mut remove = event(event::GLOBAL_REMOVE, |a| {
            a.put_uint(2);
        });
        registry.handle_event(&mut remove).unwrap();

        let names: Vec<u32> = registry.globals().iter().map(|g| g.name).collect();
        assert_eq!(names, vec![1, 3]);
        assert!(registry.find("wl_shm").is_none());
    }

    #[test]
    fn test_readvertised_name_replaces_entry() {
        let registry = Registry::new();
        global(&registry, 1, "wl_output", 3);
        global(&registry, 1, "wl_output", 4);
        assert_eq!(
            registry.globals(),
            vec![Global {
                name: 1,
                interface: "wl_output".to_string(),
                version: 4
            }]
        );
    }

    #[test]
    fn test_listener_sees_events() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.set_listener(move |e| sink.lock().push(e.clone()));

        global(&registry, 7, "wl_shm", 1);
        let mut remove = event(event::GLOBAL_REMOVE, |a| {
            a.put_uint(7);
        });
        registry.handle_event(&mut remove).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], RegistryEvent::Global(g) if g.interface == "wl_shm"));
        assert_eq!(seen[1], RegistryEvent::GlobalRemove { name: 7 });
    }

    #[test]
    fn test_clear_listener() {
        let registry = Registry::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        registry.set_listener(move |_| *sink.lock() += 1);

        global(&registry, 1, "wl_seat", 1);
        registry.clear_listener();
        global(&registry, 2, "wl_seat", 1);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_truncated_global_is_decode_error() {
        let registry = Registry::new();
        let mut e = event(event::GLOBAL, |a| {
            a.put_uint(1);
        });
        assert!(matches!(
            registry.handle_event(&mut e),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(registry.globals().is_empty());
    }

    #[test]
    fn test_bind_requires_connection() {
        let registry = Registry::new();
        let target = Arc::new(Registry::new());
        assert!(matches!(registry.bind(1, 1, target), Err(Error::Closed)));
    }
}
