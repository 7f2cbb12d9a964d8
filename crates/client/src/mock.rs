//! In-process compositor for tests.
//!
//! [`pair`] connects a [`Connection`] to a [`MockServer`] over
//! `UnixStream::pair()`. The server side either drives the exchange step by
//! step from the test body or runs a scripted loop on its own thread.

use crate::connection::Connection;
use crate::dispatch::DispatchOutcome;
use crate::proxy::{Event, EventHandler, Proxy, ProxyBase};
use crate::transport::{recv_with_fds, send_with_fds};
use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use waylink_protocol::{ArgReader, ArgWriter, DecodeError, HEADER_LEN, MessageHeader, ObjectId};

/// Object id no client ever registers in tests.
const UNKNOWN_OBJECT: u32 = 0xdead;

pub(crate) fn pair() -> (Connection, MockServer) {
    let (client, server) = UnixStream::pair().unwrap();
    let connection = Connection::from_stream(client).unwrap();
    (connection, MockServer { stream: server })
}

pub(crate) struct MockServer {
    stream: UnixStream,
}

impl MockServer {
    /// Read one request. `None` once the client has gone away.
    pub(crate) fn read_request(&mut self) -> Option<(MessageHeader, ArgReader, Vec<OwnedFd>)> {
        let mut fds = Vec::new();

        let mut head = [0u8; HEADER_LEN];
        self.fill(&mut head, &mut fds)?;
        let header = MessageHeader::parse(&head);

        let mut payload = vec![0u8; header.payload_len()];
        self.fill(&mut payload, &mut fds)?;

        Some((header, ArgReader::new(payload, Vec::new()), fds))
    }

    fn fill(&self, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> Option<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match recv_with_fds(self.stream.as_fd(), &mut buf[filled..], fds) {
                Ok(received) if received.len > 0 => filled += received.len,
                _ => return None,
            }
        }
        Some(())
    }

    pub(crate) fn send_event(&mut self, id: u32, opcode: u16, build: impl FnOnce(&mut ArgWriter<'_>)) {
        self.write_event(id, opcode, &[], build).unwrap();
    }

    pub(crate) fn send_event_with_fds(
        &mut self,
        id: u32,
        opcode: u16,
        fds: &[BorrowedFd<'_>],
        build: impl FnOnce(&mut ArgWriter<'_>),
    ) {
        self.write_event(id, opcode, fds, build).unwrap();
    }

    pub(crate) fn send_raw(&mut self, bytes: &[u8]) {
        send_with_fds(self.stream.as_fd(), bytes, &[]).unwrap();
    }

    /// Send several frames in a single `sendmsg`, so every descriptor lands
    /// on the first frame's bytes. Each frame is `(object id, opcode, uint)`.
    pub(crate) fn send_batch(&mut self, frames: &[(u32, u16, u32)], fds: &[BorrowedFd<'_>]) {
        let mut bytes = Vec::new();
        for &(id, opcode, value) in frames {
            let mut args = ArgWriter::new();
            args.put_uint(value);
            let msg = args.finish(ObjectId::new(id).unwrap(), opcode).unwrap();
            bytes.extend_from_slice(&msg.bytes);
        }
        send_with_fds(self.stream.as_fd(), &bytes, fds).unwrap();
    }

    fn write_event(
        &self,
        id: u32,
        opcode: u16,
        fds: &[BorrowedFd<'_>],
        build: impl FnOnce(&mut ArgWriter<'_>),
    ) -> io::Result<()> {
        let mut args = ArgWriter::new();
        build(&mut args);
        for fd in fds {
            args.put_fd(*fd);
        }
        let target = ObjectId::new(id).ok_or(io::ErrorKind::InvalidInput)?;
        let msg = args
            .finish(target, opcode)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        send_with_fds(self.stream.as_fd(), &msg.bytes, &msg.fds).map(|_| ())
    }

    /// Answer every request with an empty opcode 0 event on the same object.
    pub(crate) fn spawn_echo(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            while let Some((header, _, _)) = self.read_request() {
                if self.write_event(header.object_id, 0, &[], |_| {}).is_err() {
                    break;
                }
            }
        })
    }

    /// Run `script` until the client disconnects.
    pub(crate) fn spawn_compositor(mut self, script: Compositor) -> JoinHandle<CompositorLog> {
        thread::spawn(move || {
            let mut state = CompositorState::default();
            while let Some((header, args, _)) = self.read_request() {
                if self.serve(&script, &mut state, header, args).is_err() {
                    break;
                }
            }
            state.log
        })
    }

    fn serve(
        &self,
        script: &Compositor,
        state: &mut CompositorState,
        header: MessageHeader,
        mut args: ArgReader,
    ) -> io::Result<()> {
        let decode = |e: DecodeError| io::Error::new(io::ErrorKind::InvalidData, e);

        match (header.object_id, header.opcode) {
            // wl_display.sync
            (1, 0) => {
                let callback = args.next_new_id().map_err(decode)?;
                state.log.syncs += 1;

                if let Some((code, message)) = script.error_on_sync {
                    return self.write_event(1, 0, &[], |a| {
                        a.put_object(Some(callback)).put_uint(code).put_string(message);
                    });
                }

                for _ in 0..script.noise {
                    match state.registry {
                        Some(registry) => {
                            state.next_name += 1;
                            let name = 1000 + state.next_name;
                            self.write_event(registry.get(), 0, &[], |a| {
                                a.put_uint(name).put_string("noise").put_uint(1);
                            })?;
                        }
                        None => self.write_event(UNKNOWN_OBJECT, 0, &[], |a| {
                            a.put_uint(0);
                        })?,
                    }
                }

                state.serial += 1;
                let serial = state.serial;
                self.write_event(callback.get(), 0, &[], |a| {
                    a.put_uint(serial);
                })?;
                self.write_event(1, 1, &[], |a| {
                    a.put_uint(callback.get());
                })
            }
            // wl_display.get_registry
            (1, 1) => {
                let registry = args.next_new_id().map_err(decode)?;
                state.registry = Some(registry);
                for &(name, interface, version) in &script.globals {
                    self.write_event(registry.get(), 0, &[], |a| {
                        a.put_uint(name).put_string(interface).put_uint(version);
                    })?;
                }
                Ok(())
            }
            // wl_registry.bind
            (id, 0) if state.registry.map(ObjectId::get) == Some(id) => {
                let name = args.next_uint().map_err(decode)?;
                let interface = args.next_string().map_err(decode)?;
                let version = args.next_uint().map_err(decode)?;
                let new_id = args.next_new_id().map_err(decode)?;
                state.log.binds.push((name, interface, version, new_id.get()));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Behaviour of a scripted compositor.
#[derive(Debug, Clone, Default)]
pub(crate) struct Compositor {
    /// `(name, interface, version)` advertised on `get_registry`
    pub(crate) globals: Vec<(u32, &'static str, u32)>,
    /// Unrelated events sent before each `done`
    pub(crate) noise: usize,
    /// Reply to `sync` with a display error instead of `done`
    pub(crate) error_on_sync: Option<(u32, &'static str)>,
}

/// What a scripted compositor saw.
#[derive(Debug, Default)]
pub(crate) struct CompositorLog {
    pub(crate) syncs: u32,
    /// `(name, interface, version, new_id)`
    pub(crate) binds: Vec<(u32, String, u32, u32)>,
}

#[derive(Default)]
struct CompositorState {
    registry: Option<ObjectId>,
    serial: u32,
    next_name: u32,
    log: CompositorLog,
}

/// Proxy with no event handler.
pub(crate) struct Silent {
    base: ProxyBase,
    interface: &'static str,
}

impl Silent {
    pub(crate) fn with_interface(interface: &'static str) -> Self {
        Self {
            base: ProxyBase::new(),
            interface,
        }
    }
}

impl Default for Silent {
    fn default() -> Self {
        Self::with_interface("test_silent")
    }
}

impl Proxy for Silent {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        self.interface
    }
}

/// Records the leading uint of every event. Opcode 1 also carries a
/// descriptor.
#[derive(Default)]
pub(crate) struct Recorder {
    base: ProxyBase,
    values: Mutex<Vec<u32>>,
    fds: Mutex<Vec<OwnedFd>>,
}

impl Recorder {
    pub(crate) fn values(&self) -> Vec<u32> {
        self.values.lock().clone()
    }

    pub(crate) fn fd_count(&self) -> usize {
        self.fds.lock().len()
    }
}

impl Proxy for Recorder {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        "test_recorder"
    }

    fn as_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

impl EventHandler for Recorder {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError> {
        let value = event.next_uint()?;
        self.values.lock().push(value);
        if event.opcode() == 1 {
            let fd = event.next_fd()?;
            self.fds.lock().push(fd);
        }
        Ok(())
    }
}

/// Dispatches once more from inside its own handler.
#[derive(Default)]
pub(crate) struct Nested {
    base: ProxyBase,
    outcome: Mutex<Option<DispatchOutcome>>,
}

impl Nested {
    pub(crate) fn inner_outcome(&self) -> Option<DispatchOutcome> {
        *self.outcome.lock()
    }
}

impl Proxy for Nested {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        "test_nested"
    }

    fn as_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

impl EventHandler for Nested {
    fn handle_event(&self, _event: &mut Event) -> Result<(), DecodeError> {
        if let Some(connection) = self.connection() {
            let outcome = connection.dispatch().ok();
            *self.outcome.lock() = outcome;
        }
        Ok(())
    }
}

/// Panics on every event.
#[derive(Default)]
pub(crate) struct Panicking {
    base: ProxyBase,
}

impl Proxy for Panicking {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        "test_panicking"
    }

    fn as_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

impl EventHandler for Panicking {
    fn handle_event(&self, event: &mut Event) -> Result<(), DecodeError> {
        panic!("handler failed on opcode {}", event.opcode());
    }
}

/// Counts events into a shared counter.
pub(crate) struct Counter {
    base: ProxyBase,
    hits: Arc<AtomicUsize>,
}

impl Counter {
    pub(crate) fn new(hits: Arc<AtomicUsize>) -> Self {
        Self {
            base: ProxyBase::new(),
            hits,
        }
    }
}

impl Proxy for Counter {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn interface(&self) -> &'static str {
        "test_counter"
    }

    fn as_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

impl EventHandler for Counter {
    fn handle_event(&self, _event: &mut Event) -> Result<(), DecodeError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
