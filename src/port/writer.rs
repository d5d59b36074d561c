//! Per-Process send handle for an [`OutPort`](crate::port::OutPort).
//!
//! `write` fans a packet out to every linked InPort's stream for the same
//! Process and returns the delivered count; `receive` yields the single
//! backward acknowledgement each write eventually resolves to. The delivered
//! count is strictly a link-count signal — a `0` means nobody is listening,
//! and each node decides its own self-acknowledgement policy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;
use crate::port::out_port::OutPort;
use crate::port::{AckGroup, BackFrame, Frame};
use crate::process::Process;

#[derive(Clone)]
pub struct Writer {
    shared: Arc<Shared>,
}

struct Shared {
    proc: Arc<Process>,
    port: Weak<OutPort>,
    back_tx: UnboundedSender<BackFrame>,
    back_rx: tokio::sync::Mutex<UnboundedReceiver<BackFrame>>,
    // ack id -> forward packet, FIFO per id; consumed by take_link.
    correlations: Mutex<VecDeque<(u64, Arc<Packet>)>>,
    closed: CancellationToken,
}

impl Writer {
    pub(crate) fn new(proc: Arc<Process>, port: Weak<OutPort>) -> Self {
        let (back_tx, back_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                proc,
                port,
                back_tx,
                back_rx: tokio::sync::Mutex::new(back_rx),
                correlations: Mutex::new(VecDeque::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Send `pck` forward to every linked reader, returning how many streams
    /// it reached. A return of 0 means no downstream is linked (or the port
    /// is closed); no acknowledgement will arrive for that write.
    pub fn write(&self, pck: Arc<Packet>) -> usize {
        if self.shared.closed.is_cancelled() {
            return 0;
        }
        let Some(port) = self.shared.port.upgrade() else {
            return 0;
        };

        let mut streams = Vec::new();
        for target in port.targets() {
            if let Some(tx) = target.attach(&self.shared.proc) {
                streams.push(tx);
            }
        }
        if streams.is_empty() {
            return 0;
        }

        let group = Arc::new(AckGroup::new(
            pck.clone(),
            self.shared.back_tx.clone(),
            streams.len(),
        ));
        let mut delivered = 0;
        for tx in streams {
            let frame = Frame {
                packet: pck.clone(),
                group: group.clone(),
            };
            if tx.send(frame).is_ok() {
                delivered += 1;
            } else {
                // Stream closed between attach and send; the branch no
                // longer counts toward the group.
                group.discount();
            }
        }
        delivered
    }

    /// Receive the next backward acknowledgement, or `None` once the port
    /// (or this Process's stream on it) has been closed.
    pub async fn receive(&self) -> Option<Arc<Packet>> {
        let mut rx = self.shared.back_rx.lock().await;
        tokio::select! {
            _ = self.shared.closed.cancelled() => None,
            frame = rx.recv() => {
                let frame = frame?;
                self.shared
                    .correlations
                    .lock()
                    .unwrap()
                    .push_back((frame.ack.id(), frame.fwd.clone()));
                Some(frame.ack)
            }
        }
    }

    /// Resolve which forward packet `ack` answers. Consumed by the tracer
    /// and bridge right after `receive` hands the ack out.
    pub(crate) fn take_link(&self, ack: &Arc<Packet>) -> Option<Arc<Packet>> {
        let mut correlations = self.shared.correlations.lock().unwrap();
        let pos = correlations.iter().position(|(id, _)| *id == ack.id())?;
        correlations.remove(pos).map(|(_, fwd)| fwd)
    }

    pub(crate) fn close(&self) {
        self.shared.closed.cancel();
        self.shared.correlations.lock().unwrap().clear();
    }
}
