//! Internal channel frames.
//!
//! Forward traffic carries the packet plus a shared [`AckGroup`] that routes
//! the eventual acknowledgement back to the originating writer. Backward
//! traffic pairs the ack with the forward packet it answers, so correlation
//! never depends on arrival order.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::packet::Packet;

/// Forward frame delivered to a reader's stream.
pub(crate) struct Frame {
    pub packet: Arc<Packet>,
    pub group: Arc<AckGroup>,
}

/// Backward frame delivered to a writer's stream.
pub(crate) struct BackFrame {
    pub fwd: Arc<Packet>,
    pub ack: Arc<Packet>,
}

/// One forward write fanned out to N readers resolves to exactly one
/// backward frame, once every reader has acknowledged.
pub(crate) struct AckGroup {
    fwd: Arc<Packet>,
    back_tx: UnboundedSender<BackFrame>,
    state: Mutex<GroupState>,
}

struct GroupState {
    remaining: usize,
    settled: bool,
    last: Option<Arc<Packet>>,
}

impl AckGroup {
    pub fn new(fwd: Arc<Packet>, back_tx: UnboundedSender<BackFrame>, expected: usize) -> Self {
        Self {
            fwd,
            back_tx,
            state: Mutex::new(GroupState {
                remaining: expected,
                settled: false,
                last: None,
            }),
        }
    }

    /// Record one reader's acknowledgement. Error acks win over plain ones
    /// so a writer observes a downstream failure even on a fan-out link.
    pub fn ack(&self, ack: Arc<Packet>) {
        let mut state = self.state.lock().unwrap();
        match &state.last {
            Some(prev) if prev.is_error() && !ack.is_error() => {}
            _ => state.last = Some(ack),
        }
        self.settle(state);
    }

    /// Drop one expected acknowledgement without recording a value, used
    /// when a branch is torn down before it could answer. If no branch ever
    /// answered, no backward frame is emitted.
    pub fn discount(&self) {
        let state = self.state.lock().unwrap();
        self.settle(state);
    }

    fn settle(&self, mut state: std::sync::MutexGuard<'_, GroupState>) {
        if state.settled {
            return;
        }
        if state.remaining > 0 {
            state.remaining -= 1;
        }
        if state.remaining == 0 {
            state.settled = true;
            if let Some(ack) = state.last.take() {
                let _ = self.back_tx.send(BackFrame {
                    fwd: self.fwd.clone(),
                    ack,
                });
            }
        }
    }
}
