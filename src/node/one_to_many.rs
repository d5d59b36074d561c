//! One-input, many-output execution template.
//!
//! Ports: `in`, `error`, and indexed outputs `out[0]`, `out[1]`, ... created
//! on demand by the first lookup of each name, so fan-out grows without
//! pre-declared arity. A per-Process [`Bridge`] reconciles the 1-input /
//! N-output asymmetry: however many branches an invocation routes to, the
//! input reader gets exactly one acknowledgement once they have all
//! answered.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};

use crate::errors::NodeError;
use crate::node::Bridge;
use crate::packet::Packet;
use crate::port::{name, InPort, Listener, OutPort, Writer};
use crate::process::{Local, Process};

/// Decides what a one-to-many node emits: one optional packet per output
/// index (sparse routing is the norm — an If/Switch sets one slot), plus an
/// optional error.
#[async_trait]
pub trait OneToManyAction: Send + Sync {
    async fn run(
        &self,
        proc: &Arc<Process>,
        pck: &Arc<Packet>,
    ) -> (Vec<Option<Arc<Packet>>>, Option<Arc<Packet>>);
}

pub struct OneToManyNode {
    action: Arc<dyn OneToManyAction>,
    input: Arc<InPort>,
    outputs: Mutex<Vec<Arc<OutPort>>>,
    error: Arc<OutPort>,
    bridges: Local<Arc<Bridge>>,
    this: Weak<Self>,
}

impl OneToManyNode {
    pub fn new(action: Arc<dyn OneToManyAction>) -> Arc<Self> {
        Arc::new_cyclic(|node: &Weak<Self>| {
            let input = InPort::new();
            let error = OutPort::new();

            input.add_listener(Arc::new(ForwardWorker { node: node.clone() }));
            error.add_listener(Arc::new(BackwardWorker {
                node: node.clone(),
                port: Arc::downgrade(&error),
            }));

            Self {
                action,
                input,
                outputs: Mutex::new(Vec::new()),
                error,
                bridges: Local::new(),
                this: node.clone(),
            }
        })
    }

    /// Wrap a plain synchronous closure as this node's action.
    pub fn from_fn<F>(f: F) -> Arc<Self>
    where
        F: Fn(&Arc<Process>, &Arc<Packet>) -> (Vec<Option<Arc<Packet>>>, Option<Arc<Packet>>)
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

    /// Look up an output port, creating indexed `out[i]` ports (and every
    /// lower index) on first use. Plain `out` aliases `out[0]`.
    pub fn out_port(&self, port_name: &str) -> Result<Arc<OutPort>, NodeError> {
        if port_name == name::ERROR {
            return Ok(self.error.clone());
        }
        let index = if port_name == name::OUT {
            0
        } else {
            match name::index_of(port_name) {
                Some((base, index)) if base == name::OUT => index,
                _ => return Err(NodeError::unknown_port(port_name)),
            }
        };

        let mut outputs = self.outputs.lock().unwrap();
        while outputs.len() <= index {
            let port = OutPort::new();
            port.add_listener(Arc::new(BackwardWorker {
                node: self.this.clone(),
                port: Arc::downgrade(&port),
            }));
            outputs.push(port);
        }
        Ok(outputs[index].clone())
    }

    /// Close all owned ports and release per-Process state. Idempotent.
    pub fn close(&self) {
        self.input.close();
        self.error.close();
        for port in self.outputs.lock().unwrap().iter() {
            port.close();
        }
        self.bridges.close();
    }

    fn bridge(&self, proc: &Arc<Process>) -> Arc<Bridge> {
        self.bridges.load_or_create(proc, || Arc::new(Bridge::new()))
    }

    async fn forward(self: Arc<Self>, proc: Arc<Process>) {
        let reader = self.input.open(&proc);
        let err_writer = self.error.open(&proc);
        let bridge = self.bridge(&proc);

        while let Some(pck) = reader.read().await {
            let (outs, err_pck) = self.action.run(&proc, &pck).await;
            if let Some(err_pck) = err_pck {
                bridge.write(
                    &reader,
                    &pck,
                    vec![Some(err_pck)],
                    std::slice::from_ref(&err_writer),
                );
                continue;
            }

            let ports: Vec<Arc<OutPort>> = self.outputs.lock().unwrap().clone();
            let writers: Vec<Writer> = ports.iter().map(|port| port.open(&proc)).collect();
            bridge.write(&reader, &pck, outs, &writers);
        }
    }

    async fn backward(self: Arc<Self>, port: Arc<OutPort>, proc: Arc<Process>) {
        let writer = port.open(&proc);
        let bridge = self.bridge(&proc);
        while let Some(back) = writer.receive().await {
            bridge.receive(&writer, &back);
        }
    }
}

struct ForwardWorker {
    node: Weak<OneToManyNode>,
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
    node: Weak<OneToManyNode>,
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
impl<F> OneToManyAction for FnAction<F>
where
    F: Fn(&Arc<Process>, &Arc<Packet>) -> (Vec<Option<Arc<Packet>>>, Option<Arc<Packet>>)
        + Send
        + Sync,
{
    async fn run(
        &self,
        proc: &Arc<Process>,
        pck: &Arc<Packet>,
    ) -> (Vec<Option<Arc<Packet>>>, Option<Arc<Packet>>) {
        (self.f)(proc, pck)
    }
}
