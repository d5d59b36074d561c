//! Causality tracking between inbound packets and their derivations.
//!
//! One `Tracer` serves one (node, Process) pair, typically held in a
//! `Local<Arc<Tracer>>`. It records which packets were read from which
//! readers, which outbound packets derive from which inbound ones, and how
//! many forward writes are still awaiting acknowledgement. When a packet's
//! last obligation resolves, its one-shot hooks fire, its readers are
//! acknowledged, and completion propagates to its source packets — so every
//! upstream reader eventually sees exactly one ack per read, even for
//! zero-output inputs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::packet::Packet;
use crate::port::{Reader, Writer};

/// One-shot completion callback, invoked with the backward ack packet.
pub type Hook = Box<dyn FnOnce(Arc<Packet>) + Send>;

pub struct Tracer {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    traces: HashMap<u64, Trace>,
    closed: bool,
}

#[derive(Default)]
struct Trace {
    /// Packets this one was derived from.
    sources: Vec<u64>,
    /// Outstanding obligations: unacked writes plus unresolved derivations.
    pending: usize,
    hooks: Vec<Hook>,
    readers: Vec<Reader>,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Record that `pck` was consumed from `reader`; the reader will be
    /// acknowledged when the packet's causal entry completes.
    pub fn read(&self, reader: &Reader, pck: &Arc<Packet>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state
            .traces
            .entry(pck.id())
            .or_default()
            .readers
            .push(reader.clone());
    }

    /// Record a causal edge `source → target`. Self-edges (a node passing
    /// its input through unchanged) are no-ops; the input's own write
    /// obligation already covers them.
    pub fn transform(&self, source: &Arc<Packet>, target: &Arc<Packet>) {
        if source.id() == target.id() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state
            .traces
            .entry(target.id())
            .or_default()
            .sources
            .push(source.id());
        state.traces.entry(source.id()).or_default().pending += 1;
    }

    /// Register a one-shot callback for when `pck`'s acknowledgement
    /// arrives. Multiple hooks for the same packet chain in order.
    pub fn add_hook(&self, pck: &Arc<Packet>, hook: Hook) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.traces.entry(pck.id()).or_default().hooks.push(hook);
    }

    /// Push `pck` downstream through `writer` and arm tracking so the
    /// matching ack resolves it. An undelivered write (no links) resolves
    /// immediately, echoing the written packet as its own ack.
    pub fn write(&self, writer: &Writer, pck: Arc<Packet>) -> usize {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return 0;
            }
            state.traces.entry(pck.id()).or_default().pending += 1;
        }
        let delivered = writer.write(pck.clone());
        if delivered == 0 {
            self.resolve(pck.id(), pck, true);
        }
        delivered
    }

    /// Match a backward ack read from `writer` to its forward packet and
    /// resolve it.
    pub fn receive(&self, writer: &Writer, back: &Arc<Packet>) {
        let fwd = writer.take_link(back).unwrap_or_else(|| back.clone());
        self.resolve(fwd.id(), back.clone(), true);
    }

    /// Mark `pck` terminal: no reply is expected. If nothing else is
    /// outstanding for it, its readers are acknowledged with
    /// [`Packet::none`].
    pub fn reduce(&self, pck: &Arc<Packet>) {
        self.resolve(pck.id(), Packet::none(), false);
    }

    /// Release all state. Unresolved entries are dropped; unblocking any
    /// waiting upstream is the port close path's job.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.traces.clear();
    }

    fn resolve(&self, id: u64, ack: Arc<Packet>, decrement: bool) {
        let mut fire_hooks = Vec::new();
        let mut ack_readers = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            let mut queue = vec![(id, ack, decrement)];
            while let Some((id, ack, decrement)) = queue.pop() {
                let Some(trace) = state.traces.get_mut(&id) else {
                    continue;
                };
                if decrement && trace.pending > 0 {
                    trace.pending -= 1;
                }
                if trace.pending != 0 {
                    continue;
                }
                let Some(trace) = state.traces.remove(&id) else {
                    continue;
                };
                for hook in trace.hooks {
                    fire_hooks.push((hook, ack.clone()));
                }
                for reader in trace.readers {
                    ack_readers.push((reader, id, ack.clone()));
                }
                for source in trace.sources {
                    queue.push((source, ack.clone(), true));
                }
            }
        }
        // Side effects run outside the lock: hooks may call back into the
        // tracer, and reader acks forward into ack groups.
        for (hook, ack) in fire_hooks {
            hook(ack);
        }
        for (reader, source_id, ack) in ack_readers {
            reader.receive_for(source_id, ack);
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{InPort, OutPort};
    use crate::process::Process;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_reduce_acknowledges_reader_with_none() {
        let proc = Process::new();
        let upstream = OutPort::new();
        let input = InPort::new();
        upstream.link(&input);

        let writer = upstream.open(&proc);
        let tracer = Tracer::new();

        assert_eq!(writer.write(Packet::new(json!("drop me"))), 1);

        let reader = input.open(&proc);
        let pck = reader.read().await.expect("packet delivered");
        tracer.read(&reader, &pck);
        tracer.reduce(&pck);

        let ack = timeout(Duration::from_secs(1), writer.receive())
            .await
            .expect("ack must arrive")
            .expect("stream open");
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn test_transform_write_receive_acks_upstream() {
        let proc = Process::new();
        let upstream = OutPort::new();
        let input = InPort::new();
        upstream.link(&input);

        let output = OutPort::new();
        let downstream = InPort::new();
        output.link(&downstream);

        let writer = upstream.open(&proc);
        let tracer = Tracer::new();
        writer.write(Packet::new(json!(2)));

        let reader = input.open(&proc);
        let in_pck = reader.read().await.unwrap();
        tracer.read(&reader, &in_pck);

        let out_pck = Packet::new(json!(4));
        tracer.transform(&in_pck, &out_pck);
        let out_writer = output.open(&proc);
        assert_eq!(tracer.write(&out_writer, out_pck.clone()), 1);

        // Downstream consumes and acks.
        let down_reader = downstream.open(&proc);
        let got = down_reader.read().await.unwrap();
        assert_eq!(got.value(), Some(&json!(4)));
        assert!(down_reader.receive(&got));

        // Relay the backward ack through the tracer.
        let back = out_writer.receive().await.unwrap();
        tracer.receive(&out_writer, &back);

        let ack = timeout(Duration::from_secs(1), writer.receive())
            .await
            .expect("upstream ack must arrive")
            .unwrap();
        assert_eq!(ack.id(), out_pck.id());
    }

    #[tokio::test]
    async fn test_unlinked_write_self_acknowledges() {
        let proc = Process::new();
        let upstream = OutPort::new();
        let input = InPort::new();
        upstream.link(&input);

        let writer = upstream.open(&proc);
        let tracer = Tracer::new();
        writer.write(Packet::new(json!("x")));

        let reader = input.open(&proc);
        let in_pck = reader.read().await.unwrap();
        tracer.read(&reader, &in_pck);

        let out_pck = Packet::new(json!("y"));
        tracer.transform(&in_pck, &out_pck);

        let unlinked = OutPort::new();
        let out_writer = unlinked.open(&proc);
        assert_eq!(tracer.write(&out_writer, out_pck.clone()), 0);

        // The undelivered output echoes back as the upstream ack.
        let ack = timeout(Duration::from_secs(1), writer.receive())
            .await
            .expect("upstream ack must arrive")
            .unwrap();
        assert_eq!(ack.id(), out_pck.id());
    }

    #[tokio::test]
    async fn test_hooks_chain_and_run_once() {
        let proc = Process::new();
        let output = OutPort::new();
        let downstream = InPort::new();
        output.link(&downstream);

        let tracer = Tracer::new();
        let out_writer = output.open(&proc);
        let pck = Packet::new(json!("hooked"));

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            tracer.add_hook(
                &pck,
                Box::new(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        tracer.write(&out_writer, pck.clone());

        let down_reader = downstream.open(&proc);
        let got = down_reader.read().await.unwrap();
        down_reader.receive(&got);

        let back = out_writer.receive().await.unwrap();
        tracer.receive(&out_writer, &back);
        // A second receive for the same packet must not re-fire hooks.
        tracer.receive(&out_writer, &back);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
