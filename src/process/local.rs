//! Per-Process keyed storage.
//!
//! Stateful nodes remember per-invocation state (tracers, bridges,
//! collectors, session values) in a [`Local`] map keyed by Process identity.
//! Entries are created lazily and removed when the owning Process exits or
//! the map is closed along the node's `close` path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::process::Process;

/// Generic per-Process storage. `T` is a cheap handle (typically an `Arc`).
pub struct Local<T: Clone + Send + 'static> {
    entries: Arc<Mutex<HashMap<u64, T>>>,
}

impl<T: Clone + Send + 'static> Local<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the stored value for `proc`, creating it with `factory` on
    /// first use. The entry is removed automatically when `proc` exits.
    pub fn load_or_store<E>(
        &self,
        proc: &Arc<Process>,
        factory: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(value) = entries.get(&proc.id()) {
            return Ok(value.clone());
        }

        let value = factory()?;
        entries.insert(proc.id(), value.clone());
        drop(entries);

        let entries = Arc::downgrade(&self.entries);
        let id = proc.id();
        proc.add_exit_hook(Box::new(move |_| {
            if let Some(entries) = entries.upgrade() {
                entries.lock().unwrap().remove(&id);
            }
        }));

        Ok(value)
    }

    /// [`load_or_store`](Local::load_or_store) for infallible factories.
    pub fn load_or_create(&self, proc: &Arc<Process>, factory: impl FnOnce() -> T) -> T {
        let value = self
            .load_or_store::<std::convert::Infallible>(proc, || Ok(factory()));
        match value {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    pub fn load(&self, proc: &Arc<Process>) -> Option<T> {
        self.entries.lock().unwrap().get(&proc.id()).cloned()
    }

    pub fn remove(&self, proc: &Arc<Process>) -> Option<T> {
        self.entries.lock().unwrap().remove(&proc.id())
    }

    /// Tear down all stored instances.
    pub fn close(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl<T: Clone + Send + 'static> Default for Local<T> {
    fn default() -> Self {
        Self::new()
    }
}
