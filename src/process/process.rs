//! Execution contexts.
//!
//! A [`Process`] is one logical invocation flowing through the graph. A
//! single physical node instance serves many concurrent Processes; ports
//! cache one Reader/Writer per Process so traffic from different invocations
//! never crosses. Processes form a fork tree: a parent owns its children by
//! reference and may wait for them, but a child never reaches back to its
//! parent except through the exit-hook API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::observability::messages::process::{ProcessExited, ProcessForked};
use crate::observability::messages::StructuredLog;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked exactly once when a process exits, with the advisory
/// exit error (if any).
pub type ExitHook = Box<dyn FnOnce(Option<Arc<anyhow::Error>>) + Send>;

/// One logical invocation/execution context.
pub struct Process {
    id: u64,
    parent: Option<u64>,
    done: CancellationToken,
    inner: Mutex<State>,
}

struct State {
    children: Vec<Arc<Process>>,
    exit_hooks: Vec<ExitHook>,
    err: Option<Arc<anyhow::Error>>,
    exited: bool,
}

impl Process {
    /// Create a root process with no parent.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            parent: None,
            done: CancellationToken::new(),
            inner: Mutex::new(State {
                children: Vec::new(),
                exit_hooks: Vec::new(),
                err: None,
                exited: false,
            }),
        })
    }

    /// Fork a child process.
    ///
    /// The child's exit does not exit the parent; the parent may [`wait`]
    /// for it. Exited children are pruned from the parent's child set so
    /// long-lived session processes do not accumulate them.
    ///
    /// [`wait`]: Process::wait
    pub fn fork(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            parent: Some(self.id),
            done: CancellationToken::new(),
            inner: Mutex::new(State {
                children: Vec::new(),
                exit_hooks: Vec::new(),
                err: None,
                exited: false,
            }),
        });

        self.inner.lock().unwrap().children.push(child.clone());

        let parent = Arc::downgrade(self);
        let child_id = child.id;
        child.add_exit_hook(Box::new(move |_| {
            if let Some(parent) = parent.upgrade() {
                parent
                    .inner
                    .lock()
                    .unwrap()
                    .children
                    .retain(|c| c.id != child_id);
            }
        }));

        ProcessForked {
            parent_id: self.id,
            child_id: child.id,
        }
        .log();

        child
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The parent's identity, `None` for roots.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent
    }

    /// Record the exit error, signal done, and run exit hooks.
    ///
    /// Idempotent: only the first call has any effect. Hooks run after the
    /// done signal fires and must not depend on their relative order.
    pub fn exit(&self, err: Option<anyhow::Error>) {
        let (hooks, err) = {
            let mut state = self.inner.lock().unwrap();
            if state.exited {
                return;
            }
            state.exited = true;
            state.err = err.map(Arc::new);
            (std::mem::take(&mut state.exit_hooks), state.err.clone())
        };

        self.done.cancel();

        for hook in hooks.into_iter().rev() {
            hook(err.clone());
        }

        ProcessExited {
            process_id: self.id,
            error: err.as_deref().map(|e| e.to_string()),
        }
        .log();
    }

    /// The advisory exit error recorded by [`exit`](Process::exit).
    pub fn err(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.lock().unwrap().err.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once [`exit`](Process::exit) has been called.
    pub async fn done(&self) {
        self.done.cancelled().await
    }

    /// Block until all currently-known children have exited.
    ///
    /// Children forked after `wait` begins are not awaited; callers fork and
    /// wait from the same task.
    pub async fn wait(&self) {
        let children: Vec<Arc<Process>> = self.inner.lock().unwrap().children.clone();
        for child in children {
            child.done().await;
        }
    }

    /// Register a callback invoked once on exit. If the process has already
    /// exited the hook runs immediately.
    pub fn add_exit_hook(&self, hook: ExitHook) {
        let run_now = {
            let mut state = self.inner.lock().unwrap();
            if state.exited {
                Some(state.err.clone())
            } else {
                state.exit_hooks.push(hook);
                return;
            }
        };
        if let Some(err) = run_now {
            hook(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exit_is_idempotent() {
        let proc = Process::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        proc.add_exit_hook(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        proc.exit(Some(anyhow::anyhow!("first")));
        proc.exit(Some(anyhow::anyhow!("second")));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(proc.err().unwrap().to_string(), "first");
    }

    #[tokio::test]
    async fn test_done_signal_fires_once() {
        let proc = Process::new();
        assert!(!proc.is_done());
        proc.exit(None);
        assert!(proc.is_done());
        proc.done().await;
        assert!(proc.err().is_none());
    }

    #[tokio::test]
    async fn test_fork_isolation() {
        let parent = Process::new();
        let child = parent.fork();
        assert_eq!(child.parent_id(), Some(parent.id()));

        child.exit(Some(anyhow::anyhow!("branch failed")));
        assert!(!parent.is_done());
        assert!(child.err().is_some());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_children_exit() {
        let parent = Process::new();
        let child = parent.fork();

        let waited = {
            let parent = parent.clone();
            tokio::spawn(async move { parent.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waited.is_finished());

        child.exit(None);
        tokio::time::timeout(Duration::from_secs(1), waited)
            .await
            .expect("wait should resolve after child exit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_exit_hook_after_exit_runs_immediately() {
        let proc = Process::new();
        proc.exit(Some(anyhow::anyhow!("done")));

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        proc.add_exit_hook(Box::new(move |err| {
            assert!(err.is_some());
            s.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exited_children_are_pruned() {
        let parent = Process::new();
        let child = parent.fork();
        child.exit(None);

        // A pruned child set means wait resolves immediately.
        tokio::time::timeout(Duration::from_millis(100), parent.wait())
            .await
            .expect("wait should not block on exited children");
    }
}
