//! Sending endpoint owned by a node.
//!
//! An `OutPort` links to any number of `InPort`s (fan-out). Links are
//! symmetric relations, not ownership: unlinking or closing either side
//! never tears the other down. Each Process gets one cached [`Writer`],
//! with the same first-open hook/listener discipline as the in side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::observability::messages::port::PortClosed;
use crate::observability::messages::StructuredLog;
use crate::port::hooks::{self, CloseHook, Listener, OpenHook};
use crate::port::{InPort, Writer};
use crate::process::Process;

pub struct OutPort {
    state: Mutex<State>,
}

struct State {
    links: Vec<Arc<InPort>>,
    writers: HashMap<u64, Writer>,
    open_hooks: Vec<Arc<dyn OpenHook>>,
    listeners: Vec<Arc<dyn Listener>>,
    close_hooks: Vec<Arc<dyn CloseHook>>,
    closed: bool,
}

impl OutPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                links: Vec::new(),
                writers: HashMap::new(),
                open_hooks: Vec::new(),
                listeners: Vec::new(),
                close_hooks: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Establish a directed Out→In relation. Returns `false` when the
    /// target is already linked.
    pub fn link(&self, target: &Arc<InPort>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.links.iter().any(|l| Arc::ptr_eq(l, target)) {
            return false;
        }
        state.links.push(target.clone());
        true
    }

    /// Remove a previously established relation. Returns `false` when the
    /// target was not linked.
    pub fn unlink(&self, target: &Arc<InPort>) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.links.len();
        state.links.retain(|l| !Arc::ptr_eq(l, target));
        state.links.len() != before
    }

    /// Snapshot of the currently linked InPorts.
    pub(crate) fn targets(&self) -> Vec<Arc<InPort>> {
        self.state.lock().unwrap().links.clone()
    }

    /// Return the cached Writer for `proc`, creating it on first open with
    /// the same hook/listener semantics as [`InPort::open`].
    pub fn open(self: &Arc<Self>, proc: &Arc<Process>) -> Writer {
        let (writer, open_hooks, listeners) = {
            let mut state = self.state.lock().unwrap();
            if let Some(writer) = state.writers.get(&proc.id()) {
                return writer.clone();
            }
            let writer = Writer::new(proc.clone(), Arc::downgrade(self));
            if state.closed {
                writer.close();
                return writer;
            }
            state.writers.insert(proc.id(), writer.clone());
            (
                writer,
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

        writer
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

    /// Close every Process's stream, drop all links, and fire CloseHooks.
    /// Idempotent.
    pub fn close(&self) {
        let (writers, close_hooks) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.links.clear();
            state.listeners.clear();
            state.open_hooks.clear();
            (
                state.writers.drain().collect::<Vec<_>>(),
                std::mem::take(&mut state.close_hooks),
            )
        };

        PortClosed {
            kind: "out",
            streams: writers.len(),
        }
        .log();

        for (_, writer) in writers {
            writer.close();
        }
        for hook in close_hooks {
            hook.close();
        }
    }

    fn shutdown(&self, proc_id: u64) {
        let writer = self.state.lock().unwrap().writers.remove(&proc_id);
        if let Some(writer) = writer {
            writer.close();
        }
    }
}
