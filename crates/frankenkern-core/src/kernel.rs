//! The kernel-wide mutual-exclusion domain and its public facade.
//!
//! Every mutable piece of kernel state (the pid table and the handle
//! arena) sits behind one `parking_lot::Mutex`. Every completion
//! notification is a condition variable that waits on that one mutex, so
//! each lifecycle operation is atomic with respect to every other, the
//! check-then-block step in join included. This coarse-grained discipline
//! is intentional; do not introduce per-handle locks.
//!
//! [`Kernel`] is the host-side facade: boot, process spawn, the reap, and a
//! read-only snapshot surface for tests and tooling. Code running inside an
//! execution context uses the ambient operations in [`crate::thread`] and
//! [`crate::proc`], which locate the kernel through the context's binding.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{HandleArena, ThreadId};
use crate::proc::{FileRef, Pid, PidTable, ProcState};
use crate::thread::{self, Task};

/// All mutable kernel state, guarded as one unit.
pub(crate) struct KernelState {
    pub(crate) procs: PidTable,
    pub(crate) threads: HandleArena,
}

pub(crate) struct KernelShared {
    pub(crate) state: Mutex<KernelState>,
}

/// Binding of an OS thread to the execution context it realizes.
#[derive(Clone)]
pub(crate) struct CurrentCtx {
    pub(crate) shared: Arc<KernelShared>,
    pub(crate) tid: ThreadId,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentCtx>> = const { RefCell::new(None) };
}

/// Binds the calling OS thread to a context. Called once, by the
/// trampoline, before the entry task runs.
pub(crate) fn bind_current(shared: Arc<KernelShared>, tid: ThreadId) {
    CURRENT.with(|slot| {
        let previous = slot.borrow_mut().replace(CurrentCtx { shared, tid });
        debug_assert!(previous.is_none(), "context bound twice");
    });
}

/// Runs `f` with the calling thread's context binding.
///
/// # Panics
///
/// Panics when the calling OS thread is not a kernel execution context;
/// that is a harness-contract violation, not a member of the error
/// taxonomy.
pub(crate) fn with_current<R>(f: impl FnOnce(&CurrentCtx) -> R) -> R {
    let ctx = CURRENT.with(|slot| slot.borrow().clone());
    let ctx = ctx.expect("thread-lifecycle operation called outside a kernel execution context");
    f(&ctx)
}

/// A booted kernel instance. Cheap to clone; all clones share the same
/// state.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<KernelShared>,
}

impl Kernel {
    /// Boots a kernel whose pid table holds only the init process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(KernelShared {
                state: Mutex::new(KernelState {
                    procs: PidTable::with_init(),
                    threads: HandleArena::new(),
                }),
            }),
        }
    }

    /// Spawns a process as a child of init, with `task` as its primary
    /// thread. The in-context equivalent is [`crate::proc::exec`], which
    /// parents the child to the calling process.
    pub fn exec(&self, task: Task, args: &[u8]) -> Pid {
        exec_inner(&self.shared, Pid::INIT, task, args)
    }

    /// Reaps one zombie child of `parent`: blocks on the parent's
    /// completion notification until `exited_children` is non-empty, then
    /// pops the front zombie, unlinks it, removes its record, and returns
    /// its pid. Returns `None` when `parent` does not exist or has nothing
    /// left to wait for.
    pub fn wait_child(&self, parent: Pid) -> Option<Pid> {
        let mut state = self.shared.state.lock();
        loop {
            let process = state.procs.get_mut(parent)?;
            if let Some(zombie) = process.exited_children.pop_front() {
                process.children.remove(&zombie);
                let record = state.procs.free(zombie);
                debug_assert!(record.is_some(), "exited child without a record");
                log::debug!("{parent:?} reaped {zombie:?}");
                return Some(zombie);
            }
            if process.children.is_empty() {
                return None;
            }
            let notify = Arc::clone(&process.child_exit);
            notify.wait(&mut state);
        }
    }

    /// Blocks until `pid` has transitioned to ZOMBIE. Returns `false` when
    /// the record is already gone (reaped) or never existed. Rechecks the
    /// parent after every wake, since a reparent moves the notification
    /// source. Not meaningful for init, which never exits.
    pub fn wait_for_zombie(&self, pid: Pid) -> bool {
        let mut state = self.shared.state.lock();
        loop {
            let Some(process) = state.procs.get(pid) else {
                return false;
            };
            if process.state == ProcState::Zombie {
                return true;
            }
            let parent = process.parent;
            let Some(parent_record) = state.procs.get(parent) else {
                return false;
            };
            let notify = Arc::clone(&parent_record.child_exit);
            notify.wait(&mut state);
        }
    }

    /// Installs a reference-counted file entry in `pid`'s open-file table.
    /// Returns the slot index, or `None` when the process does not exist or
    /// the table is full.
    pub fn install_file(&self, pid: Pid, file: FileRef) -> Option<usize> {
        let mut state = self.shared.state.lock();
        state.procs.get_mut(pid)?.files.install(file)
    }

    /// Point-in-time view of one process.
    pub fn process_snapshot(&self, pid: Pid) -> Option<ProcessSnapshot> {
        let state = self.shared.state.lock();
        let process = state.procs.get(pid)?;
        Some(ProcessSnapshot {
            state: process.state,
            parent: process.parent,
            live_threads: process.live_threads,
            children: process.children.iter().copied().collect(),
            exited_children: process.exited_children.iter().copied().collect(),
            child_exit_signals: process.child_exit_signals,
            primary_thread: process.primary,
            registry: process.registry.iter().copied().collect(),
            open_files: process.files.open_count(),
            holds_args: process.args.is_some(),
        })
    }

    /// Point-in-time view of one thread handle. `None` once the handle has
    /// been reclaimed (or for a stale identity).
    pub fn thread_snapshot(&self, id: ThreadId) -> Option<ThreadSnapshot> {
        let state = self.shared.state.lock();
        let handle = state.threads.get(id)?;
        let registered = state
            .procs
            .get(handle.owner)
            .is_some_and(|p| p.registry.contains(&id));
        Some(ThreadSnapshot {
            owner: handle.owner,
            exited: handle.exited,
            detached: handle.detached,
            waiter_count: handle.waiter_count,
            registered,
        })
    }

    /// Number of occupied handle-arena slots, reclaimed-or-leaked
    /// accounting included.
    pub fn live_handle_slots(&self) -> usize {
        self.shared.state.lock().threads.live()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a process, taken under the kernel lock.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub state: ProcState,
    pub parent: Pid,
    pub live_threads: u32,
    pub children: Vec<Pid>,
    pub exited_children: Vec<Pid>,
    pub child_exit_signals: u64,
    pub primary_thread: Option<ThreadId>,
    pub registry: Vec<ThreadId>,
    pub open_files: usize,
    pub holds_args: bool,
}

/// Read-only view of a thread handle, taken under the kernel lock.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub owner: Pid,
    pub exited: bool,
    pub detached: bool,
    pub waiter_count: u32,
    pub registered: bool,
}

/// Creates a process under `parent` and spawns its primary thread.
pub(crate) fn exec_inner(
    shared: &Arc<KernelShared>,
    parent: Pid,
    task: Task,
    args: &[u8],
) -> Pid {
    let mut state = shared.state.lock();
    let captured = if args.is_empty() {
        None
    } else {
        Some(Box::from(args))
    };
    let pid = state.procs.alloc(parent, captured);
    state
        .procs
        .get_mut(parent)
        .expect("parent process vanished")
        .children
        .push_front(pid);
    let primary = thread::spawn_thread_in(shared, &mut state, pid, task, args);
    state
        .procs
        .get_mut(pid)
        .expect("fresh process vanished")
        .primary = Some(primary);
    log::debug!("spawned {pid:?} under {parent:?} (primary {primary:?})");
    pid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    const TICK: Duration = Duration::from_secs(5);

    #[test]
    fn boot_installs_only_init() {
        let kernel = Kernel::new();
        let init = kernel.process_snapshot(Pid::INIT).unwrap();
        assert_eq!(init.state, ProcState::Alive);
        assert_eq!(init.parent, Pid::INIT);
        assert_eq!(init.live_threads, 0);
        assert!(init.children.is_empty());
        assert_eq!(kernel.live_handle_slots(), 0);
    }

    #[test]
    fn exec_registers_primary_and_counts() {
        let kernel = Kernel::new();
        let (hold_tx, hold_rx) = channel::<()>();
        let (ready_tx, ready_rx) = channel();
        let pid = kernel.exec(
            Box::new(move |_| {
                ready_tx.send(()).unwrap();
                hold_rx.recv().ok();
                0
            }),
            b"boot-args",
        );
        ready_rx.recv_timeout(TICK).unwrap();

        let snapshot = kernel.process_snapshot(pid).unwrap();
        assert_eq!(snapshot.state, ProcState::Alive);
        assert_eq!(snapshot.parent, Pid::INIT);
        assert_eq!(snapshot.live_threads, 1);
        assert!(snapshot.holds_args);
        let primary = snapshot.primary_thread.expect("primary thread set");
        assert_eq!(snapshot.registry, vec![primary]);
        assert!(kernel.process_snapshot(Pid::INIT).unwrap().children.contains(&pid));

        hold_tx.send(()).unwrap();
        assert!(kernel.wait_for_zombie(pid));
    }

    #[test]
    fn wait_child_reaps_and_removes_record() {
        let kernel = Kernel::new();
        let pid = kernel.exec(Box::new(|_| 0), &[]);
        let reaped = kernel.wait_child(Pid::INIT).expect("one zombie child");
        assert_eq!(reaped, pid);
        assert!(kernel.process_snapshot(pid).is_none());
        assert!(!kernel.process_snapshot(Pid::INIT).unwrap().children.contains(&pid));
        assert!(!kernel.wait_for_zombie(pid));
    }

    #[test]
    fn wait_child_with_nothing_to_wait_for() {
        let kernel = Kernel::new();
        assert_eq!(kernel.wait_child(Pid::INIT), None);
        let missing = {
            // A pid that was never allocated.
            let probe = kernel.exec(Box::new(|_| 0), &[]);
            kernel.wait_child(Pid::INIT);
            probe
        };
        assert_eq!(kernel.wait_child(missing), None);
    }

    #[test]
    fn snapshots_of_unknown_ids_are_none() {
        let kernel = Kernel::new();
        assert!(kernel.thread_snapshot(ThreadId::INVALID).is_none());
        let pid = kernel.exec(Box::new(|_| 0), &[]);
        kernel.wait_child(Pid::INIT);
        assert!(kernel.process_snapshot(pid).is_none());
    }
}
