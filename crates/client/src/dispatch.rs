//! Background dispatch thread.
//!
//! Each connection owns one dispatch thread, the only reader of its socket.
//! Callers queue a ticket with the [`Scheduler`]; the thread takes the first
//! ready ticket, reads exactly one frame, routes it to the target proxy's
//! handler, and posts the outcome back under the ticket's id.
//!
//! ```text
//! Idle --ticket--> Reading --frame--> Routing --outcome--> Idle
//!                     |                  |
//!                     +---- EOF / close / fatal error ----> Terminated
//! ```
//!
//! A caller waiting for a condition (a callback firing, say) might have the
//! frame it needs routed by another caller's cycle while its own ticket is
//! still queued. Every routed frame therefore bumps a generation counter,
//! and a conditional ticket is only ready once its owner has re-checked the
//! condition at the current generation. A satisfied owner withdraws the
//! ticket instead, so the thread never blocks reading on behalf of a caller
//! that is already done.

use crate::connection::Inner;
use crate::error::{Error, Result};
use crate::proxy::Event;
use crate::transport::Frame;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use waylink_protocol::{ArgReader, ObjectId};

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event reached its proxy's handler.
    Delivered,
    /// No live proxy handles the event's target; the event was dropped.
    Dropped,
    /// The connection is closed; nothing was read.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Serve whenever the thread is free.
    Open,
    /// The owner's condition was unmet at this generation.
    Checked(u64),
    /// The owner has not checked its condition yet.
    Unchecked,
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    gate: Gate,
}

impl Ticket {
    fn is_ready(&self, generation: u64) -> bool {
        match self.gate {
            Gate::Open => true,
            Gate::Checked(at) => at == generation,
            Gate::Unchecked => false,
        }
    }
}

#[derive(Debug, Default)]
struct Schedule {
    /// Bumped after every routed frame
    generation: u64,
    next_id: u64,
    queue: VecDeque<Ticket>,
    finished: HashMap<u64, Result<DispatchOutcome>>,
    stopped: bool,
}

/// Rendezvous between callers asking for cycles and the dispatch thread.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    state: Mutex<Schedule>,
    changed: Condvar,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Have the dispatch thread run one cycle and wait for its outcome.
    ///
    /// With a condition, the ticket is withdrawn as soon as the condition
    /// holds before the thread takes it, and `None` is returned.
    pub(crate) fn request(
        &self,
        mut done: Option<&mut dyn FnMut() -> bool>,
    ) -> Option<Result<DispatchOutcome>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Some(Ok(DispatchOutcome::Closed));
        }

        let id = state.next_id;
        state.next_id += 1;
        let gate = if done.is_some() {
            Gate::Unchecked
        } else {
            Gate::Open
        };
        state.queue.push_back(Ticket { id, gate });
        self.changed.notify_all();

        loop {
            if let Some(result) = state.finished.remove(&id) {
                return Some(result);
            }

            // Not queued and not finished means the thread is serving it.
            let Some(pos) = state.queue.iter().position(|t| t.id == id) else {
                self.changed.wait(&mut state);
                continue;
            };

            if state.stopped {
                state.queue.remove(pos);
                return Some(Ok(DispatchOutcome::Closed));
            }

            if let Some(done) = done.as_deref_mut() {
                let generation = state.generation;
                if state.queue[pos].gate != Gate::Checked(generation) {
                    let satisfied = MutexGuard::unlocked(&mut state, || done());
                    // unchecked tickets are never served, so it is still queued
                    let Some(pos) = state.queue.iter().position(|t| t.id == id) else {
                        continue;
                    };
                    if satisfied {
                        state.queue.remove(pos);
                        self.changed.notify_all();
                        return None;
                    }
                    state.queue[pos].gate = Gate::Checked(generation);
                    self.changed.notify_all();
                    continue;
                }
            }

            self.changed.wait(&mut state);
        }
    }

    /// Block until a ticket is ready and take it. `None` once stopped.
    fn take_ready(&self) -> Option<u64> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            let generation = state.generation;
            if let Some(pos) = state.queue.iter().position(|t| t.is_ready(generation)) {
                return state.queue.remove(pos).map(|t| t.id);
            }
            self.changed.wait(&mut state);
        }
    }

    fn finish(&self, id: u64, result: Result<DispatchOutcome>) {
        self.state.lock().finished.insert(id, result);
        self.changed.notify_all();
    }

    /// A frame reached the routing stage; waiters re-check their conditions.
    fn routed(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Refuse new tickets and release every queued waiter.
    pub(crate) fn stop(&self) {
        self.state.lock().stopped = true;
        self.changed.notify_all();
    }
}

/// Body of the dispatch thread.
pub(crate) fn run(inner: Weak<Inner>, scheduler: Arc<Scheduler>) {
    tracing::debug!("Dispatch thread started");

    while let Some(id) = scheduler.take_ready() {
        let Some(inner) = inner.upgrade() else {
            scheduler.finish(id, Ok(DispatchOutcome::Closed));
            break;
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(|| cycle(&inner))) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Event handler panicked, closing connection");
                inner.terminate();
                Err(Error::HandlerPanicked)
            }
        };
        let terminated = inner.is_closed();
        drop(inner);

        scheduler.finish(id, result);
        if terminated {
            break;
        }
    }

    scheduler.stop();
    tracing::debug!("Dispatch thread stopped");
}

/// Read and route one frame, terminating the connection on EOF, close, or
/// any fatal error.
pub(crate) fn cycle(inner: &Arc<Inner>) -> Result<DispatchOutcome> {
    if inner.is_closed() {
        return Ok(DispatchOutcome::Closed);
    }

    let result = match inner.transport().read_frame() {
        Ok(Some(frame)) => route(inner, frame),
        Ok(None) => Ok(DispatchOutcome::Closed),
        Err(e) => Err(e),
    };

    match &result {
        Ok(DispatchOutcome::Delivered | DispatchOutcome::Dropped) => inner.scheduler().routed(),
        Ok(DispatchOutcome::Closed) => inner.terminate(),
        Err(e) => {
            tracing::error!(error = %e, "Dispatch failed, closing connection");
            inner.terminate();
        }
    }

    result
}

/// Deliver a frame to the proxy it names.
fn route(inner: &Arc<Inner>, frame: Frame) -> Result<DispatchOutcome> {
    let Frame { header, payload } = frame;

    let Some(sender) = ObjectId::new(header.object_id) else {
        tracing::warn!(opcode = header.opcode, "Event from null object, dropping");
        return Ok(DispatchOutcome::Dropped);
    };

    let Some(proxy) = inner.objects().lookup(sender) else {
        tracing::warn!(
            object_id = header.object_id,
            opcode = header.opcode,
            "No object for event, dropping"
        );
        return Ok(DispatchOutcome::Dropped);
    };

    let Some(handler) = proxy.as_handler() else {
        tracing::warn!(
            object_id = header.object_id,
            opcode = header.opcode,
            interface = proxy.interface(),
            "Object does not handle events, dropping"
        );
        return Ok(DispatchOutcome::Dropped);
    };

    let args = ArgReader::with_queue(payload, inner.transport().fds().clone());
    let mut event = Event::new(sender, header.opcode, args);
    handler.handle_event(&mut event)?;

    if let Some(err) = inner.protocol_error() {
        return Err(Error::Protocol(err));
    }

    Ok(DispatchOutcome::Delivered)
}
