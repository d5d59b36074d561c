//! Per-Process receive handle for an [`InPort`](crate::port::InPort).
//!
//! A Reader is the channel surface a node worker consumes: `read` yields
//! forward packets in FIFO order, `receive` pushes the backward
//! acknowledgement for a previously read packet. Readers are cheap clones of
//! shared state; every clone for the same Process observes the same stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::observability::messages::port::AckUnmatched;
use crate::observability::messages::StructuredLog;
use crate::packet::Packet;
use crate::port::{AckGroup, Frame};

#[derive(Clone)]
pub struct Reader {
    shared: Arc<Shared>,
}

struct Shared {
    fwd_tx: Mutex<Option<UnboundedSender<Frame>>>,
    fwd_rx: tokio::sync::Mutex<UnboundedReceiver<Frame>>,
    outstanding: Mutex<VecDeque<(Arc<Packet>, Arc<AckGroup>)>>,
    closed: CancellationToken,
}

impl Reader {
    pub(crate) fn new() -> Self {
        let (fwd_tx, fwd_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                fwd_tx: Mutex::new(Some(fwd_tx)),
                fwd_rx: tokio::sync::Mutex::new(fwd_rx),
                outstanding: Mutex::new(VecDeque::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Receive the next forward packet, or `None` once the port (or this
    /// Process's stream on it) has been closed.
    pub async fn read(&self) -> Option<Arc<Packet>> {
        let mut rx = self.shared.fwd_rx.lock().await;
        tokio::select! {
            _ = self.shared.closed.cancelled() => {
                drain(&mut rx);
                None
            }
            frame = rx.recv() => {
                let frame = frame?;
                self.shared
                    .outstanding
                    .lock()
                    .unwrap()
                    .push_back((frame.packet.clone(), frame.group));
                Some(frame.packet)
            }
        }
    }

    /// Acknowledge a previously read packet.
    ///
    /// The outstanding entry is matched by packet identity; when `pck` is a
    /// value derived by the caller rather than the read packet itself, the
    /// oldest outstanding read is acknowledged instead. Returns `false` when
    /// nothing was outstanding.
    pub fn receive(&self, pck: &Arc<Packet>) -> bool {
        let entry = {
            let mut outstanding = self.shared.outstanding.lock().unwrap();
            let pos = outstanding
                .iter()
                .position(|(read, _)| read.id() == pck.id())
                .unwrap_or(0);
            outstanding.remove(pos)
        };
        match entry {
            Some((_, group)) => {
                group.ack(pck.clone());
                true
            }
            None => {
                AckUnmatched { packet_id: pck.id() }.log();
                false
            }
        }
    }

    /// Acknowledge the outstanding read of the packet identified by
    /// `source_id`, with `ack` as the backward payload. Used by the tracer,
    /// bridge and collector, which track the source identity themselves.
    pub(crate) fn receive_for(&self, source_id: u64, ack: Arc<Packet>) -> bool {
        let entry = {
            let mut outstanding = self.shared.outstanding.lock().unwrap();
            match outstanding
                .iter()
                .position(|(read, _)| read.id() == source_id)
            {
                Some(pos) => outstanding.remove(pos),
                None => None,
            }
        };
        match entry {
            Some((_, group)) => {
                group.ack(ack);
                true
            }
            None => {
                AckUnmatched { packet_id: source_id }.log();
                false
            }
        }
    }

    /// Clone of the forward sender, for writers attaching to this stream.
    pub(crate) fn sender(&self) -> Option<UnboundedSender<Frame>> {
        self.shared.fwd_tx.lock().unwrap().clone()
    }

    /// Close this stream: pending and future `read`s observe `None`, and
    /// unanswered reads stop counting toward their writers' ack groups.
    /// Frames still queued but never read are discounted the same way,
    /// either here or by a reader blocked in `read` when it wakes.
    pub(crate) fn close(&self) {
        self.shared.closed.cancel();
        self.shared.fwd_tx.lock().unwrap().take();
        let drained: Vec<_> = self
            .shared
            .outstanding
            .lock()
            .unwrap()
            .drain(..)
            .collect();
        for (_, group) in drained {
            group.discount();
        }
        if let Ok(mut rx) = self.shared.fwd_rx.try_lock() {
            drain(&mut rx);
        }
    }
}

fn drain(rx: &mut UnboundedReceiver<Frame>) {
    while let Ok(frame) = rx.try_recv() {
        frame.group.discount();
    }
}
