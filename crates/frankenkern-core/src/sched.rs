//! Execution-context plumbing consumed from the scheduler.
//!
//! A context is a host OS thread gated behind an explicit runnable
//! handshake: the spawned thread blocks until its creator has finished
//! registering the handle and sends the identity through the gate. Dropping
//! the [`Starter`] without marking the context runnable aborts it before
//! its entry ever runs.
//!
//! Retirement is the terminal park: once a context has performed its exit
//! step it is never scheduled again, and the host thread is reclaimed by
//! unwinding out of the entry with a private sentinel.

use std::any::Any;
use std::io;
use std::panic;
use std::sync::mpsc;
use std::thread;

use crate::arena::ThreadId;

/// Sentinel unwind payload marking an orderly context retirement.
struct ContextRetired;

/// One-shot permission to start a spawned context.
pub(crate) struct Starter {
    gate: mpsc::Sender<ThreadId>,
}

impl Starter {
    /// Marks the context runnable, handing it its identity.
    pub(crate) fn make_runnable(self, id: ThreadId) {
        // A send can only fail if the context died before starting, which
        // cannot happen while the gate's receiver is still blocked in recv.
        let _ = self.gate.send(id);
    }
}

/// Ownership edge to a scheduled context, held by the thread handle until
/// the exit step releases it.
pub(crate) struct ContextHandle {
    join: thread::JoinHandle<()>,
}

impl ContextHandle {
    pub(crate) fn thread(&self) -> &thread::Thread {
        self.join.thread()
    }
}

/// Spawns a context that waits for the runnable handshake, then runs
/// `entry` with the identity it was handed.
pub(crate) fn spawn_context<F>(entry: F) -> io::Result<(Starter, ContextHandle)>
where
    F: FnOnce(ThreadId) + Send + 'static,
{
    let (gate, armed) = mpsc::channel::<ThreadId>();
    let join = thread::Builder::new()
        .name("frankenkern-ctx".into())
        .spawn(move || {
            if let Ok(id) = armed.recv() {
                entry(id);
            }
        })?;
    Ok((Starter { gate }, ContextHandle { join }))
}

/// Terminal park of the calling context. Unwinds out of the context entry
/// with the retirement sentinel; the context never runs again.
///
/// Must only be called from inside a context entry (the trampoline catches
/// the sentinel at the context boundary).
pub(crate) fn retire_current() -> ! {
    panic::resume_unwind(Box::new(ContextRetired))
}

/// Whether an unwind payload caught at the context boundary is an orderly
/// retirement rather than a task panic.
pub(crate) fn is_retirement(payload: &(dyn Any + Send)) -> bool {
    payload.is::<ContextRetired>()
}
