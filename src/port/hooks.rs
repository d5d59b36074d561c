//! Hook and listener traits for port lifecycle events.
//!
//! Hooks are registered once per port and compared by `Arc` pointer
//! identity, so re-adding the same handler is a detectable no-op.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::process::Process;

/// Background worker bound to a `(port, Process)` pair.
///
/// A listener's `accept` runs as its own tokio task, spawned on the first
/// open of the port for that Process. Node shapes use listeners for their
/// forward worker and backward ack-relay loops; agents and debuggers attach
/// extra listeners to observe traffic without altering semantics.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self, proc: Arc<Process>);
}

/// Fires synchronously inside the first `open` of a port for a Process,
/// before any listener task starts.
pub trait OpenHook: Send + Sync {
    fn open(&self, proc: &Arc<Process>);
}

/// Fires once when the port itself is closed.
pub trait CloseHook: Send + Sync {
    fn close(&self);
}

struct FnListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Listener for FnListener<F>
where
    F: Fn(Arc<Process>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn accept(&self, proc: Arc<Process>) {
        (self.f)(proc).await
    }
}

/// Wrap an async closure as a [`Listener`].
pub fn listener<F, Fut>(f: F) -> Arc<dyn Listener>
where
    F: Fn(Arc<Process>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnListener { f })
}

struct FnOpenHook<F> {
    f: F,
}

impl<F> OpenHook for FnOpenHook<F>
where
    F: Fn(&Arc<Process>) + Send + Sync,
{
    fn open(&self, proc: &Arc<Process>) {
        (self.f)(proc)
    }
}

/// Wrap a closure as an [`OpenHook`].
pub fn open_hook<F>(f: F) -> Arc<dyn OpenHook>
where
    F: Fn(&Arc<Process>) + Send + Sync + 'static,
{
    Arc::new(FnOpenHook { f })
}

struct FnCloseHook<F> {
    f: F,
}

impl<F> CloseHook for FnCloseHook<F>
where
    F: Fn() + Send + Sync,
{
    fn close(&self) {
        (self.f)()
    }
}

/// Wrap a closure as a [`CloseHook`].
pub fn close_hook<F>(f: F) -> Arc<dyn CloseHook>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(FnCloseHook { f })
}

/// Idempotent registration helper shared by both port kinds.
pub(crate) fn register<T: ?Sized>(registry: &mut Vec<Arc<T>>, handler: Arc<T>) -> bool {
    if registry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
        return false;
    }
    registry.push(handler);
    true
}

pub(crate) fn deregister<T: ?Sized>(registry: &mut Vec<Arc<T>>, handler: &Arc<T>) -> bool {
    let before = registry.len();
    registry.retain(|h| !Arc::ptr_eq(h, handler));
    registry.len() != before
}
