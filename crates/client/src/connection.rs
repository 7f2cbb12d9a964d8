//! Connection to a display server.
//!
//! A [`Connection`] multiplexes every proxy over one Unix stream socket. It
//! owns the object table, serializes writes, and drives a background dispatch
//! thread that reads events one at a time on request.

use crate::dispatch::{self, DispatchOutcome, Scheduler};
use crate::error::{Error, ProtocolError, Result};
use crate::objects::ObjectTable;
use crate::proxy::Proxy;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::os::fd::FromRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use waylink_protocol::{
    ArgWriter, ObjectId, OutgoingMessage, inherited_socket_fd, resolve_socket_path,
};

/// Shared connection state. Proxies hold it weakly; the dispatch thread
/// upgrades it once per cycle.
pub(crate) struct Inner {
    transport: Transport,
    objects: ObjectTable,
    /// Hands dispatch cycles to the dispatch thread; stopped on termination
    scheduler: Arc<Scheduler>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_id: OnceLock<ThreadId>,
    closed: AtomicBool,
    protocol_error: Mutex<Option<ProtocolError>>,
}

impl Inner {
    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn protocol_error(&self) -> Option<ProtocolError> {
        self.protocol_error.lock().clone()
    }

    pub(crate) fn set_protocol_error(&self, err: ProtocolError) {
        let mut slot = self.protocol_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn on_dispatch_thread(&self) -> bool {
        self.dispatcher_id.get() == Some(&thread::current().id())
    }

    /// Enter the terminated state: wake the reader, refuse new tickets and
    /// writes. Idempotent.
    pub(crate) fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.cancel();
        self.scheduler.stop();
        tracing::debug!("Connection terminated");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.terminate();
        // proxies may hold resources such as file descriptors
        let released = self.objects.clear();
        drop(released);
    }
}

/// Handle to an open connection. Cheap to clone; all clones share one socket.
///
/// The connection closes when [`Connection::close`] is called, when the server
/// hangs up, or when the last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect to the server socket named by `name`, `WAYLAND_DISPLAY`, or the
    /// default, inside `XDG_RUNTIME_DIR`.
    pub fn connect(name: Option<&str>) -> Result<Self> {
        let path = resolve_socket_path(name)?;
        Self::connect_to(&path)
    }

    /// Connect using the environment the way a spawned client should:
    /// an inherited `WAYLAND_SOCKET` descriptor wins over path resolution.
    pub fn connect_env() -> Result<Self> {
        match inherited_socket_fd()? {
            Some(fd) => {
                tracing::debug!(fd = fd, "Using inherited socket");
                // SAFETY: WAYLAND_SOCKET hands this process sole ownership of
                // an open, connected socket descriptor.
                let stream = unsafe { UnixStream::from_raw_fd(fd) };
                set_cloexec(&stream)?;
                Self::from_stream(stream)
            }
            None => Self::connect(None),
        }
    }

    /// Connect to an explicit socket path.
    pub fn connect_to(path: &Path) -> Result<Self> {
        tracing::debug!(socket = %path.display(), "Connecting");
        let stream = UnixStream::connect(path)?;
        Self::from_stream(stream)
    }

    /// Wrap an already connected socket and start the dispatch thread.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let scheduler = Arc::new(Scheduler::new());

        let inner = Arc::new(Inner {
            transport: Transport::new(stream)?,
            objects: ObjectTable::new(),
            scheduler: Arc::clone(&scheduler),
            dispatcher: Mutex::new(None),
            dispatcher_id: OnceLock::new(),
            closed: AtomicBool::new(false),
            protocol_error: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("waylink-dispatch".to_string())
            .spawn(move || dispatch::run(weak, scheduler))?;

        let _ = inner.dispatcher_id.set(handle.thread().id());
        *inner.dispatcher.lock() = Some(handle);

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Register a client-created proxy, assigning it the next id.
    ///
    /// Must happen before any request naming the proxy is sent.
    pub fn register<P: Proxy>(&self, proxy: Arc<P>) -> Result<ObjectId> {
        let id = self
            .inner
            .objects
            .register(proxy, Arc::downgrade(&self.inner))?;
        tracing::trace!(object_id = id.get(), "Registered object");
        Ok(id)
    }

    /// Register a proxy for an object the server created, under the id the
    /// server chose.
    pub fn register_server_object<P: Proxy>(&self, id: ObjectId, proxy: Arc<P>) -> Result<()> {
        self.inner
            .objects
            .register_at(id, proxy, Arc::downgrade(&self.inner))?;
        tracing::trace!(object_id = id.get(), "Registered server object");
        Ok(())
    }

    /// Remove a proxy from the object table. Its id is never handed out again.
    pub fn unregister<P: Proxy + ?Sized>(&self, proxy: &P) {
        if let Some(id) = proxy.id() {
            self.unregister_id(id);
        }
    }

    pub fn unregister_id(&self, id: ObjectId) -> Option<Arc<dyn Proxy>> {
        let removed = self.inner.objects.unregister(id);
        if removed.is_some() {
            tracing::trace!(object_id = id.get(), "Unregistered object");
        }
        removed
    }

    /// Resolve an id to its live proxy.
    #[must_use]
    pub fn lookup(&self, id: ObjectId) -> Option<Arc<dyn Proxy>> {
        self.inner.objects.lookup(id)
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.objects.len()
    }

    /// Encode and send a request on `proxy`.
    pub fn send_request<P: Proxy + ?Sized>(
        &self,
        proxy: &P,
        opcode: u16,
        args: ArgWriter<'_>,
    ) -> Result<()> {
        let id = proxy.id().ok_or(Error::NotRegistered {
            interface: proxy.interface(),
        })?;
        let msg = args.finish(id, opcode)?;
        self.write_message(&msg)
    }

    /// Send an already framed message.
    ///
    /// Write failures are fatal: the connection is closed before the error
    /// is returned.
    pub fn write_message(&self, msg: &OutgoingMessage<'_>) -> Result<()> {
        if self.inner.is_closed() {
            return Err(Error::Closed);
        }

        match self.inner.transport.send(msg) {
            Ok(()) => Ok(()),
            Err(Error::Closed) => Err(Error::Closed),
            Err(e) => {
                tracing::error!(error = %e, "Write failed, closing connection");
                self.inner.terminate();
                Err(e)
            }
        }
    }

    /// Run one dispatch cycle: wait for the next event, route it, return.
    ///
    /// Blocks until a frame arrives or the connection closes. May be called
    /// from an event handler, in which case the cycle runs inline on the
    /// dispatch thread.
    pub fn dispatch(&self) -> Result<DispatchOutcome> {
        if self.inner.on_dispatch_thread() {
            return dispatch::cycle(&self.inner);
        }

        self.inner
            .scheduler
            .request(None)
            .unwrap_or(Ok(DispatchOutcome::Closed))
    }

    /// Dispatch until `done` returns true.
    ///
    /// Unrelated events are routed normally while waiting. `done` is checked
    /// again after every frame routed on the connection, including frames
    /// another thread's dispatch picked up, so concurrent waiters each return
    /// once their own condition holds. Returns [`Error::Closed`] if the
    /// connection closes first.
    pub fn dispatch_until(&self, mut done: impl FnMut() -> bool) -> Result<()> {
        loop {
            if done() {
                return Ok(());
            }

            let outcome = if self.inner.on_dispatch_thread() {
                dispatch::cycle(&self.inner)?
            } else {
                match self.inner.scheduler.request(Some(&mut done)) {
                    Some(result) => result?,
                    None => return Ok(()),
                }
            };

            if outcome == DispatchOutcome::Closed {
                return if done() { Ok(()) } else { Err(Error::Closed) };
            }
        }
    }

    /// Close the connection.
    ///
    /// Wakes a blocked dispatch, releases every waiter, stops the dispatch
    /// thread, and shuts the socket down. Idempotent.
    pub fn close(&self) {
        self.inner.terminate();

        if self.inner.on_dispatch_thread() {
            return;
        }
        let handle = self.inner.dispatcher.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Dispatch thread panicked");
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Fatal error the server reported, if any.
    #[must_use]
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        self.inner.protocol_error()
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("objects", &self.object_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn set_cloexec(stream: &UnixStream) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `stream`
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
