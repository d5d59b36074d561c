//! Fan-in gathering.
//!
//! A many-to-one node may receive its inputs out of order across N readers.
//! The [`Collector`] buffers one FIFO queue per input index and releases a
//! full ordered slice only once every input has contributed a packet; until
//! then callers keep waiting on their own readers. One Collector serves one
//! (node, Process) pair, created with the node's arity at the time the
//! Process first touches it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::packet::Packet;

pub struct Collector {
    queues: Mutex<Vec<VecDeque<Arc<Packet>>>>,
}

impl Collector {
    pub fn new(arity: usize) -> Self {
        Self {
            queues: Mutex::new((0..arity).map(|_| VecDeque::new()).collect()),
        }
    }

    /// Offer the packet read from input `index`. Returns the full ordered
    /// slice when this offer completes a set, `None` otherwise.
    pub fn read(&self, index: usize, pck: Arc<Packet>) -> Option<Vec<Arc<Packet>>> {
        let mut queues = self.queues.lock().unwrap();
        if queues.len() <= index {
            queues.resize_with(index + 1, VecDeque::new);
        }
        queues[index].push_back(pck);

        if queues.iter().any(|q| q.is_empty()) {
            return None;
        }
        Some(queues.iter_mut().filter_map(VecDeque::pop_front).collect())
    }

    /// Drop any partially gathered sets.
    pub fn close(&self) {
        self.queues.lock().unwrap().iter_mut().for_each(VecDeque::clear);
    }
}
