//! Process control blocks and the pid table.
//!
//! Only the thread-related shape of a process is modeled here: the live
//! thread counter and registry, the parent/children membership lists, the
//! exited-children queue with its completion notification, the startup
//! argument buffer, and the fixed-capacity open-file table. Everything else
//! a real process would carry is out of scope.

use std::fmt;
use std::sync::Arc;

use parking_lot::Condvar;

use crate::arena::ThreadId;
use crate::kernel;
use crate::list::MemberList;
use crate::thread::Task;

/// Process identifier. Plain table index; records are only reclaimed by the
/// parent's reap, so no generation check is needed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u32);

impl Pid {
    /// The init process. Booted with the kernel, exempt from the
    /// reparent/notify steps of the exit cascade.
    pub const INIT: Pid = Pid(1);
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// At least one thread has not yet exited (or none was ever created).
    Alive,
    /// The last thread exited and the cascade ran; awaiting the parent's
    /// reap.
    Zombie,
}

/// Capacity of the per-process open-file table.
pub const MAX_FILEID: usize = 16;

/// Reference-counted entry of the open-file table. The table holds one
/// strong reference per installed entry; clearing the slot is the decref.
#[derive(Debug)]
pub struct FileObject {
    label: String,
}

impl FileObject {
    #[must_use]
    pub fn new(label: impl Into<String>) -> FileRef {
        Arc::new(FileObject {
            label: label.into(),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

pub type FileRef = Arc<FileObject>;

/// Fixed-capacity table of reference-counted file entries.
pub(crate) struct FidTable {
    entries: [Option<FileRef>; MAX_FILEID],
}

impl FidTable {
    fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| None),
        }
    }

    /// Installs `file` in the first free slot; `None` when the table is
    /// full.
    pub(crate) fn install(&mut self, file: FileRef) -> Option<usize> {
        let slot = self.entries.iter().position(Option::is_none)?;
        self.entries[slot] = Some(file);
        Some(slot)
    }

    /// Drops the reference held by every entry and clears the table.
    /// Returns how many entries were released.
    pub(crate) fn clear(&mut self) -> usize {
        let mut released = 0;
        for entry in &mut self.entries {
            if entry.take().is_some() {
                released += 1;
            }
        }
        released
    }

    pub(crate) fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// Per-process control block (thread-related fields only).
pub(crate) struct Process {
    pub(crate) state: ProcState,
    pub(crate) parent: Pid,
    pub(crate) children: MemberList<Pid>,
    /// Children that became zombies, awaiting this process's reap.
    pub(crate) exited_children: MemberList<Pid>,
    /// Signalled whenever a new zombie is appended to `exited_children`.
    pub(crate) child_exit: Arc<Condvar>,
    /// Monotonic count of `child_exit` broadcasts, for observers.
    pub(crate) child_exit_signals: u64,
    /// Number of registry entries whose `exited` flag is still false.
    pub(crate) live_threads: u32,
    /// Every handle created for this process and not yet reclaimed.
    pub(crate) registry: MemberList<ThreadId>,
    /// The first thread handle; cleared by the cascade.
    pub(crate) primary: Option<ThreadId>,
    /// Captured startup argument buffer; released by the cascade.
    pub(crate) args: Option<Box<[u8]>>,
    pub(crate) files: FidTable,
}

impl Process {
    pub(crate) fn new(parent: Pid, args: Option<Box<[u8]>>) -> Self {
        Self {
            state: ProcState::Alive,
            parent,
            children: MemberList::new(),
            exited_children: MemberList::new(),
            child_exit: Arc::new(Condvar::new()),
            child_exit_signals: 0,
            live_threads: 0,
            registry: MemberList::new(),
            primary: None,
            args,
            files: FidTable::new(),
        }
    }
}

/// Pid-indexed process table. Slot 0 is never issued; init occupies slot 1
/// from boot. Freed slots are reused without a generation check (see
/// DESIGN.md).
pub(crate) struct PidTable {
    slots: Vec<Option<Process>>,
    free: Vec<u32>,
}

impl PidTable {
    /// Table with only the init process installed.
    pub(crate) fn with_init() -> Self {
        let mut slots = Vec::with_capacity(8);
        slots.push(None);
        slots.push(Some(Process::new(Pid::INIT, None)));
        Self {
            slots,
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, parent: Pid, args: Option<Box<[u8]>>) -> Pid {
        let process = Process::new(parent, args);
        match self.free.pop() {
            Some(ix) => {
                debug_assert!(self.slots[ix as usize].is_none());
                self.slots[ix as usize] = Some(process);
                Pid(ix)
            }
            None => {
                self.slots.push(Some(process));
                Pid((self.slots.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.0 as usize)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.0 as usize)?.as_mut()
    }

    /// Removes a process record (the reap). Init is never removed.
    pub(crate) fn free(&mut self, pid: Pid) -> Option<Process> {
        if pid == Pid::INIT {
            return None;
        }
        let record = self.slots.get_mut(pid.0 as usize)?.take()?;
        self.free.push(pid.0);
        Some(record)
    }
}

/// Creates a new child process of the calling process and spawns its
/// primary thread running `task` over `args`. Returns the child's pid.
///
/// Callable only from inside a kernel execution context; the host-side
/// equivalent is [`crate::Kernel::exec`], which parents the child to init.
pub fn exec(task: Task, args: &[u8]) -> Pid {
    kernel::with_current(|ctx| {
        let parent = {
            let state = ctx.shared.state.lock();
            state
                .threads
                .get(ctx.tid)
                .expect("current context has no handle")
                .owner
        };
        kernel::exec_inner(&ctx.shared, parent, task, args)
    })
}

/// Pid of the process owning the calling context. O(1); callable only from
/// inside a kernel execution context.
pub fn current_pid() -> Pid {
    kernel::with_current(|ctx| {
        ctx.shared
            .state
            .lock()
            .threads
            .get(ctx.tid)
            .expect("current context has no handle")
            .owner
    })
}
