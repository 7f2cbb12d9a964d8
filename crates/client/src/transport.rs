//! Socket I/O: framed reads and writes with `SCM_RIGHTS` descriptor passing.
//!
//! Reads are only ever issued by the dispatch thread. Every blocking read
//! first polls the socket together with a cancellation pipe, so closing the
//! connection wakes a reader that is waiting for the next frame.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::ffi::{c_int, c_void};
use std::io;
use std::mem::size_of;
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use waylink_protocol::{FdQueue, HEADER_LEN, MAX_FDS_OUT, MessageHeader, OutgoingMessage};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: c_int = 0;

/// One frame read off the socket. Its descriptors, if any, are on the
/// transport's [`FdQueue`].
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) header: MessageHeader,
    pub(crate) payload: Vec<u8>,
}

/// Outcome of filling a buffer from the socket.
#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Complete,
    /// Stream ended after this many bytes.
    Eof(usize),
    Cancelled,
}

/// Outcome of a single `recvmsg`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Received {
    pub(crate) len: usize,
    /// Control data did not fit and descriptors were discarded.
    pub(crate) truncated: bool,
}

/// Space needed for a control message carrying `count` descriptors.
fn cmsg_space(count: usize) -> usize {
    // SAFETY: CMSG_SPACE is pure arithmetic
    unsafe { libc::CMSG_SPACE((count * size_of::<c_int>()) as u32) as usize }
}

/// Control buffer with `cmsghdr` alignment.
fn cmsg_buffer(count: usize) -> Vec<u64> {
    vec![0u64; cmsg_space(count).div_ceil(size_of::<u64>())]
}

/// Send `bytes` in one `sendmsg`, attaching `fds` as a single
/// `SCM_RIGHTS` control message. Returns the number of bytes sent.
pub(crate) fn send_with_fds(
    sock: BorrowedFd<'_>,
    bytes: &[u8],
    fds: &[BorrowedFd<'_>],
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut c_void,
        iov_len: bytes.len(),
    };
    let mut cmsg_buf = cmsg_buffer(fds.len());

    // SAFETY: msghdr is plain data; zeroed is a valid empty header
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_space(fds.len()) as _;

        // SAFETY: the control buffer is sized by CMSG_SPACE for exactly
        // fds.len() descriptors, so the first header and its data fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * size_of::<c_int>()) as u32) as _;
            let data = libc::CMSG_DATA(cmsg).cast::<c_int>();
            for (i, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data.add(i), fd.as_raw_fd());
            }
        }
    }

    loop {
        // SAFETY: msg points at live buffers for the duration of the call
        let n = unsafe { libc::sendmsg(sock.as_raw_fd(), &msg, SEND_FLAGS) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// One `recvmsg` into `buf`, appending any received descriptors to `fds`.
pub(crate) fn recv_with_fds(
    sock: BorrowedFd<'_>,
    buf: &mut [u8],
    fds: &mut Vec<OwnedFd>,
) -> io::Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut cmsg_buf = cmsg_buffer(MAX_FDS_OUT);

    // SAFETY: msghdr is plain data; zeroed is a valid empty header
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = (cmsg_buf.len() * size_of::<u64>()) as _;

    let n = loop {
        // SAFETY: msg points at live buffers for the duration of the call
        let n = unsafe { libc::recvmsg(sock.as_raw_fd(), &mut msg, RECV_FLAGS) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    // SAFETY: the kernel filled msg_control with well-formed headers up to
    // msg_controllen; every SCM_RIGHTS descriptor is a fresh fd we now own.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<c_int>();
                let count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize)
                    / size_of::<c_int>();
                for i in 0..count {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(Received {
        len: n,
        truncated: msg.msg_flags & libc::MSG_CTRUNC != 0,
    })
}

/// Self-pipe used to interrupt a blocked reader.
struct CancelPipe {
    reader: OwnedFd,
    writer: OwnedFd,
    fired: AtomicBool,
}

impl CancelPipe {
    fn new() -> io::Result<Self> {
        let mut fds: [c_int; 2] = [0; 2];
        // SAFETY: pipe2 writes two descriptors into the array on success
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both descriptors were just created and are owned by nobody else
        let (reader, writer) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            reader,
            writer,
            fired: AtomicBool::new(false),
        })
    }

    /// Make the read end permanently readable.
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let byte = 1u8;
            // SAFETY: writes one byte from a live stack variable
            let _ = unsafe {
                libc::write(
                    self.writer.as_raw_fd(),
                    (&byte as *const u8).cast(),
                    1,
                )
            };
        }
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// The connection's socket plus the state serializing access to it.
pub(crate) struct Transport {
    socket: UnixStream,
    /// Held for the duration of one `sendmsg` so requests never interleave
    write_lock: Mutex<()>,
    cancel: CancelPipe,
    /// Every descriptor received and not yet claimed by an event
    fds: FdQueue,
}

impl Transport {
    pub(crate) fn new(socket: UnixStream) -> io::Result<Self> {
        socket.set_nonblocking(false)?;
        Ok(Self {
            socket,
            write_lock: Mutex::new(()),
            cancel: CancelPipe::new()?,
            fds: FdQueue::new(),
        })
    }

    /// The connection's queue of received descriptors.
    pub(crate) fn fds(&self) -> &FdQueue {
        &self.fds
    }

    /// Write one request, header, payload and descriptors in a single call.
    pub(crate) fn send(&self, msg: &OutgoingMessage<'_>) -> Result<()> {
        let _guard = self.write_lock.lock();

        if self.cancel.is_fired() {
            return Err(Error::Closed);
        }

        let written = send_with_fds(self.socket.as_fd(), &msg.bytes, &msg.fds)?;
        if written != msg.bytes.len() {
            return Err(Error::ShortWrite {
                expected: msg.bytes.len(),
                written,
            });
        }

        tracing::trace!(
            object_id = msg.header.object_id,
            opcode = msg.header.opcode,
            size = msg.header.size,
            fds = msg.fds.len(),
            "-> request"
        );
        Ok(())
    }

    /// Read exactly one frame.
    ///
    /// Returns `Ok(None)` on orderly shutdown: end-of-stream at a frame
    /// boundary, or cancellation.
    pub(crate) fn read_frame(&self) -> Result<Option<Frame>> {
        let mut header_buf = [0u8; HEADER_LEN];
        match self.fill(&mut header_buf)? {
            Fill::Complete => {}
            Fill::Eof(0) => {
                tracing::debug!("Server closed the connection");
                return Ok(None);
            }
            Fill::Eof(got) => {
                return Err(Error::ShortRead {
                    expected: HEADER_LEN,
                    got,
                });
            }
            Fill::Cancelled => return Ok(None),
        }

        let header = MessageHeader::parse(&header_buf);
        header.validate()?;

        let mut payload = vec![0u8; header.payload_len()];
        match self.fill(&mut payload)? {
            Fill::Complete => {}
            Fill::Eof(got) => {
                return Err(Error::ShortRead {
                    expected: header.payload_len(),
                    got,
                });
            }
            Fill::Cancelled => return Ok(None),
        }

        tracing::trace!(
            object_id = header.object_id,
            opcode = header.opcode,
            size = header.size,
            queued_fds = self.fds.len(),
            "<- event"
        );

        Ok(Some(Frame { header, payload }))
    }

    /// Receive until `buf` is full, the stream ends, or the read is cancelled.
    /// Descriptors that arrive along the way join the queue.
    fn fill(&self, buf: &mut [u8]) -> Result<Fill> {
        let mut filled = 0;
        let mut fds = Vec::new();
        while filled < buf.len() {
            if !self.wait_readable()? {
                return Ok(Fill::Cancelled);
            }

            let received = recv_with_fds(self.socket.as_fd(), &mut buf[filled..], &mut fds)?;
            for fd in fds.drain(..) {
                self.fds.push(fd);
            }
            if received.truncated {
                return Err(Error::ControlTruncated);
            }
            if received.len == 0 {
                return Ok(Fill::Eof(filled));
            }
            filled += received.len;
        }
        Ok(Fill::Complete)
    }

    /// Block until the socket is readable (`true`) or cancellation fires
    /// (`false`).
    fn wait_readable(&self) -> Result<bool> {
        let mut pollfds = [
            libc::pollfd {
                fd: self.socket.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.cancel.reader.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        loop {
            if self.cancel.is_fired() {
                return Ok(false);
            }

            // SAFETY: pollfds is a live array of two entries
            let n = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            if pollfds[1].revents != 0 {
                return Ok(false);
            }
            if pollfds[0].revents != 0 {
                return Ok(true);
            }
        }
    }

    /// Wake any blocked reader and refuse further writes.
    pub(crate) fn cancel(&self) {
        self.cancel.fire();
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}
