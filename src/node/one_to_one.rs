//! One-input, one-output execution template.
//!
//! Wraps a user action into a node with ports `in`, `out`, and `error`. The
//! forward worker (one per Process, started lazily on the first packet
//! delivered for that Process) reads, runs the action, and routes the result
//! through the per-Process [`Tracer`] so the input reader gets exactly one
//! acknowledgement whether the action produced an output, an error, or
//! nothing. Backward workers on `out` and `error` relay acks back through
//! the same Tracer.

use async_trait::async_trait;
use std::sync::{Arc, Weak};

use crate::errors::NodeError;
use crate::packet::{Packet, Tracer};
use crate::port::{name, InPort, Listener, OutPort};
use crate::process::{Local, Process};

/// Decides what a one-to-one node emits for an input: `(out, err)`. At most
/// one of the two should be set; `(None, None)` means "consumed, no output".
#[async_trait]
pub trait OneToOneAction: Send + Sync {
    async fn run(
        &self,
        proc: &Arc<Process>,
        pck: &Arc<Packet>,
    ) -> (Option<Arc<Packet>>, Option<Arc<Packet>>);
}

pub struct OneToOneNode {
    action: Arc<dyn OneToOneAction>,
    input: Arc<InPort>,
    output: Arc<OutPort>,
    error: Arc<OutPort>,
    tracers: Local<Arc<Tracer>>,
}

impl OneToOneNode {
    pub fn new(action: Arc<dyn OneToOneAction>) -> Arc<Self> {
        Arc::new_cyclic(|node: &Weak<Self>| {
            let input = InPort::new();
            let output = OutPort::new();
            let error = OutPort::new();

            input.add_listener(Arc::new(ForwardWorker { node: node.clone() }));
            output.add_listener(Arc::new(BackwardWorker {
                node: node.clone(),
                port: Arc::downgrade(&output),
            }));
            error.add_listener(Arc::new(BackwardWorker {
                node: node.clone(),
                port: Arc::downgrade(&error),
            }));

            Self {
                action,
                input,
                output,
                error,
                tracers: Local::new(),
            }
        })
    }

    /// Wrap a plain synchronous closure as this node's action.
    pub fn from_fn<F>(f: F) -> Arc<Self>
    where
        F: Fn(&Arc<Process>, &Arc<Packet>) -> (Option<Arc<Packet>>, Option<Arc<Packet>>)
            + Send
            + Sync
            + 'static,
    {
        Self::new(Arc::new(FnAction { f }))
    }

    pub fn in_port(&self, port_name: &str) -> Result<Arc<InPort>, NodeError> {
        match port_name {
            name::IN => Ok(self.input.clone()),
            _ => Err(NodeError::unknown_port(port_name)),
        }
    }

    pub fn out_port(&self, port_name: &str) -> Result<Arc<OutPort>, NodeError> {
        match port_name {
            name::OUT => Ok(self.output.clone()),
            name::ERROR => Ok(self.error.clone()),
            _ => Err(NodeError::unknown_port(port_name)),
        }
    }

    /// Close all owned ports and release per-Process state. Idempotent and
    /// safe to call with Processes still in flight: their workers observe
    /// closed streams and return.
    pub fn close(&self) {
        self.input.close();
        self.output.close();
        self.error.close();
        self.tracers.close();
    }

    fn tracer(&self, proc: &Arc<Process>) -> Arc<Tracer> {
        self.tracers
            .load_or_create(proc, || Arc::new(Tracer::new()))
    }

    async fn forward(self: Arc<Self>, proc: Arc<Process>) {
        let reader = self.input.open(&proc);
        let out_writer = self.output.open(&proc);
        let err_writer = self.error.open(&proc);
        let tracer = self.tracer(&proc);

        while let Some(pck) = reader.read().await {
            tracer.read(&reader, &pck);
            let (out_pck, err_pck) = self.action.run(&proc, &pck).await;
            if let Some(err_pck) = err_pck {
                tracer.transform(&pck, &err_pck);
                tracer.write(&err_writer, err_pck);
            } else if let Some(out_pck) = out_pck {
                tracer.transform(&pck, &out_pck);
                tracer.write(&out_writer, out_pck);
            } else {
                tracer.reduce(&pck);
            }
        }
    }

    async fn backward(self: Arc<Self>, port: Arc<OutPort>, proc: Arc<Process>) {
        let writer = port.open(&proc);
        let tracer = self.tracer(&proc);
        while let Some(back) = writer.receive().await {
            tracer.receive(&writer, &back);
        }
    }
}

struct ForwardWorker {
    node: Weak<OneToOneNode>,
}

#[async_trait]
impl Listener for ForwardWorker {
    async fn accept(&self, proc: Arc<Process>) {
        if let Some(node) = self.node.upgrade() {
            node.forward(proc).await;
        }
    }
}

struct BackwardWorker {
    node: Weak<OneToOneNode>,
    port: Weak<OutPort>,
}

#[async_trait]
impl Listener for BackwardWorker {
    async fn accept(&self, proc: Arc<Process>) {
        let (Some(node), Some(port)) = (self.node.upgrade(), self.port.upgrade()) else {
            return;
        };
        node.backward(port, proc).await;
    }
}

struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F> OneToOneAction for FnAction<F>
where
    F: Fn(&Arc<Process>, &Arc<Packet>) -> (Option<Arc<Packet>>, Option<Arc<Packet>>)
        + Send
        + Sync,
{
    async fn run(
        &self,
        proc: &Arc<Process>,
        pck: &Arc<Packet>,
    ) -> (Option<Arc<Packet>>, Option<Arc<Packet>>) {
        (self.f)(proc, pck)
    }
}
