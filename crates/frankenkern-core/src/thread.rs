//! Thread handles and the lifecycle operations.
//!
//! A handle moves through two regimes: *running-joinable* (initial), then
//! either *exited* (terminal) or *detached* (terminal with respect to
//! joinability; the underlying thread may still reach `exited` afterward,
//! but the handle is no longer collectible via join).
//!
//! Reclamation follows an explicit reference model: the owning process's
//! registry holds the one owning reference, and every blocked joiner holds
//! a borrowed one (`waiter_count`). The handle is freed only by the joiner
//! that observes `waiter_count == 0` after its own decrement, and only on
//! the exited path. A handle abandoned via detach is never reclaimed by a
//! later join, and the exit cascade drains registry entries without freeing
//! their arena slots. Both are inherited behaviors, kept as-is (see
//! DESIGN.md).
//!
//! Every operation here runs under the kernel-wide lock, so each one is
//! atomic with respect to every other; the predicate check and the block in
//! join are a single step.

use std::mem;
use std::panic;
use std::sync::Arc;

use parking_lot::Condvar;

use crate::arena::ThreadId;
use crate::error::ThreadError;
use crate::kernel::{self, KernelShared, KernelState};
use crate::proc::{Pid, ProcState, Process};
use crate::sched;

/// Entry task of a thread: runs over the captured argument buffer and
/// yields the thread's exit status.
pub type Task = Box<dyn FnOnce(&[u8]) -> i32 + Send + 'static>;

/// Per-thread control block.
pub(crate) struct ThreadHandle {
    /// Owning process; a handle belongs to exactly one registry.
    pub(crate) owner: Pid,
    /// Entry task, consumed by the trampoline when the context starts.
    pub(crate) task: Option<Task>,
    /// Captured argument buffer, consumed with the task.
    pub(crate) args: Box<[u8]>,
    /// Monotonic false→true, set at most once, by the exit step.
    pub(crate) exited: bool,
    /// Monotonic false→true, set at most once, never after `exited`.
    pub(crate) detached: bool,
    /// Meaningful only once `exited` is true.
    pub(crate) exit_value: Option<i32>,
    /// Callers currently blocked joining this handle.
    pub(crate) waiter_count: u32,
    /// Wakes blocked joiners; a broadcast, so wakes are hints only.
    pub(crate) exit_notify: Arc<Condvar>,
    /// Exclusive ownership edge to the scheduled context, released by the
    /// exit step.
    pub(crate) context: Option<sched::ContextHandle>,
}

impl ThreadHandle {
    pub(crate) fn new(owner: Pid, task: Task, args: &[u8]) -> Self {
        Self {
            owner,
            task: Some(task),
            args: Box::from(args),
            exited: false,
            detached: false,
            exit_value: None,
            waiter_count: 0,
            exit_notify: Arc::new(Condvar::new()),
            context: None,
        }
    }
}

/// Creates a new thread in the calling process.
///
/// Spawns an execution context bound to a trampoline that runs `task` over
/// `args` and then unconditionally performs the exit step; registers the
/// handle in the owning process and marks the context runnable. With no
/// task the call is a no-op and returns [`ThreadId::INVALID`].
pub fn create_thread(task: Option<Task>, args: &[u8]) -> ThreadId {
    kernel::with_current(|ctx| {
        let Some(task) = task else {
            log::trace!("create_thread without a task is a no-op");
            return ThreadId::INVALID;
        };
        let mut state = ctx.shared.state.lock();
        let owner = state
            .threads
            .get(ctx.tid)
            .expect("current context has no handle")
            .owner;
        spawn_thread_in(&ctx.shared, &mut state, owner, task, args)
    })
}

/// The calling thread's own handle. O(1); always succeeds from inside a
/// kernel execution context.
pub fn current_handle() -> ThreadId {
    kernel::with_current(|ctx| ctx.tid)
}

/// Joins `target`, blocking until it exits or is detached.
///
/// Fails without blocking on an unknown handle, a self-join, or a target
/// already detached at call time. A blocked join woken by a detach fails
/// with [`ThreadError::Abandoned`]. On the exited path the exit value is
/// returned, and the last joiner out reclaims the handle.
pub fn join(target: ThreadId) -> Result<i32, ThreadError> {
    kernel::with_current(|ctx| {
        let mut state = ctx.shared.state.lock();
        let caller_proc = state
            .threads
            .get(ctx.tid)
            .expect("current context has no handle")
            .owner;

        {
            let registry = &state
                .procs
                .get(caller_proc)
                .expect("calling process vanished")
                .registry;
            let Some(handle) = state.threads.get(target) else {
                return Err(ThreadError::UnknownHandle);
            };
            if !registry.contains(&target) {
                return Err(ThreadError::UnknownHandle);
            }
            if target == ctx.tid {
                return Err(ThreadError::SelfJoin);
            }
            if handle.detached {
                return Err(ThreadError::AlreadyDetached);
            }
        }

        let notify = {
            let handle = state.threads.get_mut(target).expect("validated above");
            handle.waiter_count += 1;
            Arc::clone(&handle.exit_notify)
        };

        // The wake is a broadcast shared with unrelated waiters; re-check
        // the predicate every time. waiter_count > 0 pins the handle, so
        // the re-lookup cannot miss.
        loop {
            let settled = {
                let handle = state
                    .threads
                    .get(target)
                    .expect("joined handle vanished while watched");
                handle.exited || handle.detached
            };
            if settled {
                break;
            }
            notify.wait(&mut state);
        }

        let handle = state
            .threads
            .get_mut(target)
            .expect("joined handle vanished while watched");
        handle.waiter_count -= 1;
        if handle.detached {
            // Abandoned wake: no exit value, and the handle is not
            // reclaimed on this path.
            return Err(ThreadError::Abandoned);
        }
        let status = handle
            .exit_value
            .expect("exited handle without an exit value");
        if handle.waiter_count == 0 {
            let owner = handle.owner;
            if let Some(process) = state.procs.get_mut(owner) {
                process.registry.remove(&target);
                debug_assert!(!process.registry.contains(&target));
            }
            state.threads.remove(target);
            log::trace!("{target:?} reclaimed by last joiner");
        }
        Ok(status)
    })
}

/// Detaches `target`, forfeiting its join-ability and waking every blocked
/// joiner. Succeeds exactly once per handle; fails on an unknown handle, an
/// already-exited target, or a repeated detach.
pub fn detach(target: ThreadId) -> Result<(), ThreadError> {
    kernel::with_current(|ctx| {
        let mut state = ctx.shared.state.lock();
        let caller_proc = state
            .threads
            .get(ctx.tid)
            .expect("current context has no handle")
            .owner;
        if !state
            .procs
            .get(caller_proc)
            .expect("calling process vanished")
            .registry
            .contains(&target)
        {
            return Err(ThreadError::UnknownHandle);
        }
        let Some(handle) = state.threads.get_mut(target) else {
            return Err(ThreadError::UnknownHandle);
        };
        if handle.exited {
            return Err(ThreadError::AlreadyExited);
        }
        if handle.detached {
            return Err(ThreadError::AlreadyDetached);
        }
        handle.detached = true;
        handle.exit_notify.notify_all();
        log::trace!("{target:?} detached");
        Ok(())
    })
}

/// Terminates the calling thread. Sets the terminal state, wakes every
/// joiner, and, when this was the process's last live thread, runs the
/// zombie cascade. Never returns; the context is retired.
pub fn thread_exit(status: i32) -> ! {
    kernel::with_current(|ctx| {
        let mut state = ctx.shared.state.lock();
        let owner = {
            let handle = state
                .threads
                .get_mut(ctx.tid)
                .expect("current context has no handle");
            debug_assert!(!handle.exited, "exit step ran twice");
            handle.exited = true;
            handle.exit_value = Some(status);
            if let Some(context) = handle.context.take() {
                log::trace!(
                    "{:?} released context {:?}",
                    ctx.tid,
                    context.thread().name()
                );
            }
            handle.exit_notify.notify_all();
            handle.owner
        };
        let remaining = {
            let process = state.procs.get_mut(owner).expect("owning process vanished");
            assert!(
                process.live_threads > 0,
                "live thread count underflow in {owner:?}"
            );
            process.live_threads -= 1;
            process.live_threads
        };
        log::trace!("{:?} exited status={status} ({owner:?} live={remaining})", ctx.tid);
        if remaining == 0 {
            exit_cascade(&mut state, owner);
        }
    });
    sched::retire_current()
}

/// Registers a new handle in `owner`, spawns its context, and marks it
/// runnable. Shared by thread creation and the process-spawn path.
pub(crate) fn spawn_thread_in(
    shared: &Arc<KernelShared>,
    state: &mut KernelState,
    owner: Pid,
    task: Task,
    args: &[u8],
) -> ThreadId {
    let trampoline_shared = Arc::clone(shared);
    let (starter, context) = sched::spawn_context(move |id| trampoline(trampoline_shared, id))
        .expect("failed to spawn an execution context");

    let mut handle = ThreadHandle::new(owner, task, args);
    handle.context = Some(context);
    let id = state.threads.insert(handle);

    let process = state.procs.get_mut(owner).expect("owning process vanished");
    process.registry.push_back(id);
    process.live_threads += 1;
    log::trace!("created {id:?} in {owner:?} (live={})", process.live_threads);

    starter.make_runnable(id);
    id
}

/// Context entry: consume the task and argument buffer, run the task, then
/// perform the exit step. A panicking task is converted into an abnormal
/// exit so the process-level accounting stays consistent.
fn trampoline(shared: Arc<KernelShared>, id: ThreadId) {
    kernel::bind_current(Arc::clone(&shared), id);
    let (task, args) = {
        let mut state = shared.state.lock();
        let handle = state
            .threads
            .get_mut(id)
            .expect("runnable context without a handle");
        (
            handle.task.take().expect("entry task already consumed"),
            mem::take(&mut handle.args),
        )
    };

    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let status = task(&args);
        thread_exit(status);
    }));
    match outcome {
        Ok(()) => unreachable!("exit step returned"),
        Err(payload) if sched::is_retirement(payload.as_ref()) => {}
        Err(_) => {
            log::error!("{id:?} task panicked; exiting with status -1");
            let fallback = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                thread_exit(-1);
            }));
            debug_assert!(
                matches!(&fallback, Err(payload) if sched::is_retirement(payload.as_ref()))
            );
        }
    }
}

/// The zombie transition, run exactly when `live_threads` first reaches
/// zero. An explicit ordered sequence, atomic under the kernel lock.
fn exit_cascade(state: &mut KernelState, pid: Pid) {
    // Init has no parent: the reparent/notify steps do not apply to it.
    if pid != Pid::INIT {
        // Orphans move to init's children set.
        let mut orphans = mem::take(&mut proc_mut(state, pid).children);
        while let Some(child) = orphans.pop_front() {
            proc_mut(state, child).parent = Pid::INIT;
            proc_mut(state, Pid::INIT).children.push_front(child);
            log::trace!("reparented {child:?} to init");
        }

        // Zombies this process never reaped go to init as well.
        let mut pending = mem::take(&mut proc_mut(state, pid).exited_children);
        if !pending.is_empty() {
            let init = proc_mut(state, Pid::INIT);
            init.exited_children.append(&mut pending);
            init.child_exit_signals += 1;
            init.child_exit.notify_all();
        }

        // Hand this process to its parent for reaping.
        let parent = proc_mut(state, pid).parent;
        let parent_record = proc_mut(state, parent);
        parent_record.exited_children.push_front(pid);
        parent_record.child_exit_signals += 1;
        parent_record.child_exit.notify_all();
    }

    let process = proc_mut(state, pid);
    process.args = None;
    let released = process.files.clear();
    process.primary = None;
    // Drain the registry. Arena slots of still-registered handles are left
    // in place (inherited behavior, see DESIGN.md).
    while process.registry.pop_front().is_some() {}
    process.state = ProcState::Zombie;
    log::debug!("{pid:?} is now a zombie ({released} file refs dropped)");
}

fn proc_mut(state: &mut KernelState, pid: Pid) -> &mut Process {
    state.procs.get_mut(pid).expect("process record vanished")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    const TICK: Duration = Duration::from_secs(5);

    #[test]
    fn create_without_task_returns_invalid_handle() {
        let kernel = Kernel::new();
        let (tx, rx) = channel();
        kernel.exec(
            Box::new(move |_| {
                let id = create_thread(None, &[]);
                tx.send((id, join(id), detach(id))).unwrap();
                0
            }),
            &[],
        );
        let (id, join_res, detach_res) = rx.recv_timeout(TICK).unwrap();
        assert!(!id.is_valid());
        assert_eq!(join_res, Err(ThreadError::UnknownHandle));
        assert_eq!(detach_res, Err(ThreadError::UnknownHandle));
    }

    #[test]
    fn self_join_fails_without_blocking_or_side_effects() {
        let kernel = Kernel::new();
        let (tx, rx) = channel();
        let pid = kernel.exec(
            Box::new(move |_| {
                let me = current_handle();
                tx.send((me, join(me))).unwrap();
                0
            }),
            &[],
        );
        let (me, res) = rx.recv_timeout(TICK).unwrap();
        assert_eq!(res, Err(ThreadError::SelfJoin));
        assert!(kernel.wait_for_zombie(pid));
        // No waiter was registered by the failed self-join.
        let snapshot = kernel.thread_snapshot(me).unwrap();
        assert_eq!(snapshot.waiter_count, 0);
    }

    #[test]
    fn task_receives_its_argument_buffer() {
        let kernel = Kernel::new();
        let (tx, rx) = channel();
        kernel.exec(
            Box::new(move |_| {
                let worker = create_thread(
                    Some(Box::new(|args| i32::from(args[0]) + i32::from(args[1]))),
                    &[40, 2],
                );
                tx.send(join(worker)).unwrap();
                0
            }),
            &[],
        );
        assert_eq!(rx.recv_timeout(TICK).unwrap(), Ok(42));
    }

    #[test]
    fn detach_succeeds_exactly_once() {
        let kernel = Kernel::new();
        let (release_tx, release_rx) = channel::<()>();
        let (tx, rx) = channel();
        kernel.exec(
            Box::new(move |_| {
                let worker = create_thread(
                    Some(Box::new(move |_| {
                        release_rx.recv().ok();
                        0
                    })),
                    &[],
                );
                let first = detach(worker);
                let second = detach(worker);
                let join_after = join(worker);
                release_tx.send(()).unwrap();
                tx.send((first, second, join_after)).unwrap();
                0
            }),
            &[],
        );
        let (first, second, join_after) = rx.recv_timeout(TICK).unwrap();
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(ThreadError::AlreadyDetached));
        assert_eq!(join_after, Err(ThreadError::AlreadyDetached));
    }

    #[test]
    fn exit_forecloses_detach_but_not_join() {
        let kernel = Kernel::new();
        let probe = kernel.clone();
        let (tx, rx) = channel();
        kernel.exec(
            Box::new(move |_| {
                let worker = create_thread(Some(Box::new(|_| 7)), &[]);
                // Wait until the worker's exit step has run before poking
                // at the handle.
                while !probe.thread_snapshot(worker).is_some_and(|s| s.exited) {
                    std::thread::yield_now();
                }
                tx.send((detach(worker), join(worker))).unwrap();
                0
            }),
            &[],
        );
        let (detach_res, join_res) = rx.recv_timeout(TICK).unwrap();
        assert_eq!(detach_res, Err(ThreadError::AlreadyExited));
        assert_eq!(join_res, Ok(7));
    }

    #[test]
    fn cross_process_handles_are_unknown() {
        let kernel = Kernel::new();
        let (handle_tx, handle_rx) = channel();
        let (hold_tx, hold_rx) = channel::<()>();
        kernel.exec(
            Box::new(move |_| {
                let worker = create_thread(
                    Some(Box::new(move |_| {
                        hold_rx.recv().ok();
                        0
                    })),
                    &[],
                );
                handle_tx.send((worker, hold_tx)).unwrap();
                0
            }),
            &[],
        );
        let (foreign, _hold_tx) = handle_rx.recv_timeout(TICK).unwrap();

        let (tx, rx) = channel();
        kernel.exec(
            Box::new(move |_| {
                tx.send((join(foreign), detach(foreign))).unwrap();
                0
            }),
            &[],
        );
        let (join_res, detach_res) = rx.recv_timeout(TICK).unwrap();
        assert_eq!(join_res, Err(ThreadError::UnknownHandle));
        assert_eq!(detach_res, Err(ThreadError::UnknownHandle));
    }
}
