//! Failure taxonomy for the thread-lifecycle operations.
//!
//! Every variant is an expected outcome of concurrent callers racing on the
//! same handle; none is retried internally and none is fatal to the kernel.

use thiserror::Error;

/// Result contract for `join`/`detach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// The handle is not registered in the calling process. Handles are
    /// never valid across processes, and a reclaimed handle's identity
    /// stops resolving.
    #[error("handle not registered in the calling process")]
    UnknownHandle,

    /// A thread may not join itself.
    #[error("a thread cannot join itself")]
    SelfJoin,

    /// The handle was already detached when the call was made.
    #[error("handle is already detached")]
    AlreadyDetached,

    /// Detach target has already exited; exit forecloses detach.
    #[error("thread has already exited")]
    AlreadyExited,

    /// A blocked join was woken because the target became detached rather
    /// than exited. No exit value is available on this path.
    #[error("join abandoned: target was detached while waiting")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_render_distinct_messages() {
        let all = [
            ThreadError::UnknownHandle,
            ThreadError::SelfJoin,
            ThreadError::AlreadyDetached,
            ThreadError::AlreadyExited,
            ThreadError::Abandoned,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.to_string(), b.to_string());
            }
        }
    }
}
