//! Receiving endpoint owned by a node.
//!
//! An `InPort` may be the target of any number of `OutPort` links (fan-in).
//! Each Process gets one cached [`Reader`] stream, created on first open —
//! whether that open comes from the owning node or from an upstream write
//! attaching on delivery. The first open per Process fires OpenHooks
//! synchronously and spawns one task per registered listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::observability::messages::port::PortClosed;
use crate::observability::messages::StructuredLog;
use crate::port::hooks::{self, CloseHook, Listener, OpenHook};
use crate::port::{Frame, Reader};
use crate::process::Process;

pub struct InPort {
    state: Mutex<State>,
}

struct State {
    readers: HashMap<u64, Reader>,
    open_hooks: Vec<Arc<dyn OpenHook>>,
    listeners: Vec<Arc<dyn Listener>>,
    close_hooks: Vec<Arc<dyn CloseHook>>,
    closed: bool,
}

impl InPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                readers: HashMap::new(),
                open_hooks: Vec::new(),
                listeners: Vec::new(),
                close_hooks: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Return the cached Reader for `proc`, creating it on first open.
    ///
    /// Creation fires every OpenHook synchronously, spawns every listener as
    /// a background task bound to `(port, proc)`, and registers an exit hook
    /// on `proc` that tears the stream down when the Process exits. Opening
    /// a closed port yields an already-closed Reader.
    pub fn open(self: &Arc<Self>, proc: &Arc<Process>) -> Reader {
        let (reader, open_hooks, listeners) = {
            let mut state = self.state.lock().unwrap();
            if let Some(reader) = state.readers.get(&proc.id()) {
                return reader.clone();
            }
            let reader = Reader::new();
            if state.closed {
                reader.close();
                return reader;
            }
            state.readers.insert(proc.id(), reader.clone());
            (
                reader,
                state.open_hooks.clone(),
                state.listeners.clone(),
            )
        };

        for hook in open_hooks {
            hook.open(proc);
        }
        for listener in listeners {
            let proc = proc.clone();
            tokio::spawn(async move { listener.accept(proc).await });
        }

        let port = Arc::downgrade(self);
        let proc_id = proc.id();
        proc.add_exit_hook(Box::new(move |_| {
            if let Some(port) = port.upgrade() {
                port.shutdown(proc_id);
            }
        }));

        reader
    }

    /// Obtain the forward sender for `proc`'s stream, opening it on demand.
    /// Returns `None` when the port is closed or the Process already exited.
    pub(crate) fn attach(self: &Arc<Self>, proc: &Arc<Process>) -> Option<UnboundedSender<Frame>> {
        if proc.is_done() {
            return None;
        }
        self.open(proc).sender()
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> bool {
        hooks::register(&mut self.state.lock().unwrap().listeners, listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        hooks::deregister(&mut self.state.lock().unwrap().listeners, listener)
    }

    pub fn add_open_hook(&self, hook: Arc<dyn OpenHook>) -> bool {
        hooks::register(&mut self.state.lock().unwrap().open_hooks, hook)
    }

    pub fn remove_open_hook(&self, hook: &Arc<dyn OpenHook>) -> bool {
        hooks::deregister(&mut self.state.lock().unwrap().open_hooks, hook)
    }

    pub fn add_close_hook(&self, hook: Arc<dyn CloseHook>) -> bool {
        hooks::register(&mut self.state.lock().unwrap().close_hooks, hook)
    }

    pub fn remove_close_hook(&self, hook: &Arc<dyn CloseHook>) -> bool {
        hooks::deregister(&mut self.state.lock().unwrap().close_hooks, hook)
    }

    /// Close every Process's stream and fire CloseHooks. Idempotent.
    pub fn close(&self) {
        let (readers, close_hooks) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.listeners.clear();
            state.open_hooks.clear();
            (
                state.readers.drain().collect::<Vec<_>>(),
                std::mem::take(&mut state.close_hooks),
            )
        };

        PortClosed {
            kind: "in",
            streams: readers.len(),
        }
        .log();

        for (_, reader) in readers {
            reader.close();
        }
        for hook in close_hooks {
            hook.close();
        }
    }

    fn shutdown(&self, proc_id: u64) {
        let reader = self.state.lock().unwrap().readers.remove(&proc_id);
        if let Some(reader) = reader {
            reader.close();
        }
    }
}
