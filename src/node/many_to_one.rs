//! Many-input, one-output execution template.
//!
//! Ports: indexed inputs `in[0]`, `in[1]`, ... created on demand, plus `out`
//! and `error`. Each input runs its own forward worker per Process; workers
//! feed the shared per-Process [`Collector`], and the worker whose packet
//! completes a set runs the action over the full ordered slice. Every packet
//! of a consumed set is acknowledged through the per-Process [`Tracer`] once
//! the single result (or error, or nothing) has resolved downstream.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};

use crate::errors::NodeError;
use crate::node::Collector;
use crate::packet::{Packet, Tracer};
use crate::port::{name, InPort, Listener, OutPort};
use crate::process::{Local, Process};

/// Decides what a many-to-one node emits for a complete input set: `(out,
/// err)`. At most one of the two should be set; `(None, None)` means
/// "consumed, no output".
#[async_trait]
pub trait ManyToOneAction: Send + Sync {
    async fn run(
        &self,
        proc: &Arc<Process>,
        pcks: &[Arc<Packet>],
    ) -> (Option<Arc<Packet>>, Option<Arc<Packet>>);
}

pub struct ManyToOneNode {
    action: Arc<dyn ManyToOneAction>,
    inputs: Mutex<Vec<Arc<InPort>>>,
    output: Arc<OutPort>,
    error: Arc<OutPort>,
    tracers: Local<Arc<Tracer>>,
    collectors: Local<Arc<Collector>>,
    this: Weak<Self>,
}

impl ManyToOneNode {
    pub fn new(action: Arc<dyn ManyToOneAction>) -> Arc<Self> {
        Arc::new_cyclic(|node: &Weak<Self>| {
            let output = OutPort::new();
            let error = OutPort::new();

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
                inputs: Mutex::new(Vec::new()),
                output,
                error,
                tracers: Local::new(),
                collectors: Local::new(),
                this: node.clone(),
            }
        })
    }

    /// Wrap a plain synchronous closure as this node's action.
    pub fn from_fn<F>(f: F) -> Arc<Self>
    where
        F: Fn(&Arc<Process>, &[Arc<Packet>]) -> (Option<Arc<Packet>>, Option<Arc<Packet>>)
            + Send
            + Sync
            + 'static,
    {
        Self::new(Arc::new(FnAction { f }))
    }

    /// Look up an input port, creating indexed `in[i]` ports (and every
    /// lower index) on first use. Plain `in` aliases `in[0]`.
    pub fn in_port(&self, port_name: &str) -> Result<Arc<InPort>, NodeError> {
        let index = if port_name == name::IN {
            0
        } else {
            match name::index_of(port_name) {
                Some((base, index)) if base == name::IN => index,
                _ => return Err(NodeError::unknown_port(port_name)),
            }
        };

        let mut inputs = self.inputs.lock().unwrap();
        while inputs.len() <= index {
            let port = InPort::new();
            port.add_listener(Arc::new(ForwardWorker {
                node: self.this.clone(),
                index: inputs.len(),
            }));
            inputs.push(port);
        }
        Ok(inputs[index].clone())
    }

    pub fn out_port(&self, port_name: &str) -> Result<Arc<OutPort>, NodeError> {
        match port_name {
            name::OUT => Ok(self.output.clone()),
            name::ERROR => Ok(self.error.clone()),
            _ => Err(NodeError::unknown_port(port_name)),
        }
    }

    /// Close all owned ports and release per-Process state. Idempotent.
    pub fn close(&self) {
        for port in self.inputs.lock().unwrap().iter() {
            port.close();
        }
        self.output.close();
        self.error.close();
        self.tracers.close();
        self.collectors.close();
    }

    fn tracer(&self, proc: &Arc<Process>) -> Arc<Tracer> {
        self.tracers
            .load_or_create(proc, || Arc::new(Tracer::new()))
    }

    fn collector(&self, proc: &Arc<Process>) -> Arc<Collector> {
        let arity = self.inputs.lock().unwrap().len();
        self.collectors
            .load_or_create(proc, || Arc::new(Collector::new(arity)))
    }

    async fn forward(self: Arc<Self>, index: usize, proc: Arc<Process>) {
        let port = self.inputs.lock().unwrap()[index].clone();
        let reader = port.open(&proc);
        let out_writer = self.output.open(&proc);
        let err_writer = self.error.open(&proc);
        let tracer = self.tracer(&proc);
        let collector = self.collector(&proc);

        while let Some(pck) = reader.read().await {
            tracer.read(&reader, &pck);
            let Some(set) = collector.read(index, pck) else {
                continue;
            };

            let (out_pck, err_pck) = self.action.run(&proc, &set).await;
            if let Some(err_pck) = err_pck {
                for src in &set {
                    tracer.transform(src, &err_pck);
                }
                tracer.write(&err_writer, err_pck);
            } else if let Some(out_pck) = out_pck {
                for src in &set {
                    tracer.transform(src, &out_pck);
                }
                tracer.write(&out_writer, out_pck);
            } else {
                for src in &set {
                    tracer.reduce(src);
                }
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
    node: Weak<ManyToOneNode>,
    index: usize,
}

#[async_trait]
impl Listener for ForwardWorker {
    async fn accept(&self, proc: Arc<Process>) {
        if let Some(node) = self.node.upgrade() {
            node.forward(self.index, proc).await;
        }
    }
}

struct BackwardWorker {
    node: Weak<ManyToOneNode>,
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
impl<F> ManyToOneAction for FnAction<F>
where
    F: Fn(&Arc<Process>, &[Arc<Packet>]) -> (Option<Arc<Packet>>, Option<Arc<Packet>>)
        + Send
        + Sync,
{
    async fn run(
        &self,
        proc: &Arc<Process>,
        pcks: &[Arc<Packet>],
    ) -> (Option<Arc<Packet>>, Option<Arc<Packet>>) {
        (self.f)(proc, pcks)
    }
}
