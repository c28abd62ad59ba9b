//! # frankenkern-core
//!
//! Thread-lifecycle subsystem of the FrankenKern teaching kernel: thread
//! creation, the join/detach protocol, and the exit cascade that turns a
//! process into a zombie when its last thread terminates (orphans are
//! reparented to init, the parent is notified, process resources are
//! released).
//!
//! The kernel is modeled, not bare-metal: execution contexts are host OS
//! threads gated behind an explicit runnable handshake, and every mutation
//! of kernel state happens under one kernel-wide lock, so the concurrent
//! semantics (blocked joins, broadcast wakes, racing detach/exit) are real
//! and exercised directly by `cargo test`.
//!
//! Entry points: boot a [`Kernel`], spawn a process with [`Kernel::exec`],
//! and use the ambient operations ([`create_thread`], [`join`], [`detach`],
//! [`thread_exit`], [`exec`]) from inside its tasks.

#![deny(unsafe_code)]

pub mod arena;
pub mod error;
pub mod kernel;
pub mod list;
pub mod proc;
mod sched;
pub mod thread;

pub use arena::ThreadId;
pub use error::ThreadError;
pub use kernel::{Kernel, ProcessSnapshot, ThreadSnapshot};
pub use proc::{FileObject, FileRef, MAX_FILEID, Pid, ProcState, current_pid, exec};
pub use thread::{Task, create_thread, current_handle, detach, join, thread_exit};
