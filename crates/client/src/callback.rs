//! `wl_callback`: a one-shot completion notification.

use crate::proxy::{Event, EventHandler, Proxy, ProxyBase};
use parking_lot::Mutex;
use std::sync::OnceLock;
use waylink_protocol::DecodeError;

pub const INTERFACE: &str = "wl_callback";

/// Event opcodes
pub mod event {
    pub const DONE: u16 = 0;
}

type DoneListener = Box<dyn FnOnce(u32) + Send>;

/// Fires once with a serial, then is destroyed by the server.
#[derive(Default)]
pub struct Callback {
    base: ProxyBase,
    serial: OnceLock<u32>,
    listener: Mutex<Option<DoneListener>>,
}

impl Callback {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `listener` when `done` arrives. If it already has, run it now.
    pub fn on_done(&self, listener: impl FnOnce(u32) + Send + 'static) {
        let mut slot = self.listener.lock();
        match self.serial.get() {
            Some(&serial) => {
                drop(slot);
                listener(serial);
            }
            None => *slot = Some(Box::new(listener)),
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.serial.get().is_some()
    }

    /// Serial carried by `done`, once it has arrived.
    #[must_use]
    pub fn serial(&self) -> Option<u32> {
        self.serial.get().copied()
    }
}

impl Proxy for Callback {
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

impl EventHandler for Callback {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError> {
        match event.opcode() {
            event::DONE => {
                let serial = event.next_uint()?;
                let listener = {
                    let mut slot = self.listener.lock();
                    if self.serial.set(serial).is_err() {
                        tracing::warn!(object_id = %event.sender(), "Callback fired twice");
                        return Ok(());
                    }
                    slot.take()
                };
                if let Some(listener) = listener {
                    listener(serial);
                }
                Ok(())
            }
            _ => Err(event.unknown_opcode(INTERFACE)),
        }
    }
}
