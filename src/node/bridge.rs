//! Fan-out acknowledgement reconciliation.
//!
//! A one-to-many node turns one inbound packet into writes across several
//! output ports. The [`Bridge`] buffers expected-versus-received counts for
//! those parallel branches and emits exactly one synthetic acknowledgement
//! to the inbound reader once every written branch has answered — in any
//! order. One Bridge serves one (node, Process) pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::packet::Packet;
use crate::port::{Reader, Writer};

pub struct Bridge {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Inbound packet id -> pending branch group.
    groups: HashMap<u64, Group>,
    /// Outbound packet id -> inbound packet id.
    routes: HashMap<u64, u64>,
    closed: bool,
}

struct Group {
    reader: Reader,
    source_id: u64,
    remaining: usize,
    received: Option<Arc<Packet>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Fan the non-`None` slots of `outs` out to the writers at the same
    /// indices, returning the total delivered count.
    ///
    /// The inbound reader is acknowledged once every written branch has
    /// answered. An entirely-`None` `outs` (the node routed nowhere)
    /// acknowledges the input immediately with [`Packet::none`]; a branch
    /// whose write reaches no links counts as answered by its own packet.
    pub fn write(
        &self,
        reader: &Reader,
        in_pck: &Arc<Packet>,
        outs: Vec<Option<Arc<Packet>>>,
        writers: &[Writer],
    ) -> usize {
        let sends: Vec<(Arc<Packet>, Writer)> = outs
            .into_iter()
            .zip(writers.iter())
            .filter_map(|(out, writer)| out.map(|out| (out, writer.clone())))
            .collect();

        if sends.is_empty() {
            reader.receive_for(in_pck.id(), Packet::none());
            return 0;
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return 0;
            }
            state.groups.insert(
                in_pck.id(),
                Group {
                    reader: reader.clone(),
                    source_id: in_pck.id(),
                    remaining: sends.len(),
                    received: None,
                },
            );
            for (out, _) in &sends {
                state.routes.insert(out.id(), in_pck.id());
            }
        }

        let mut delivered = 0;
        for (out, writer) in sends {
            let count = writer.write(out.clone());
            if count == 0 {
                // Unlinked branch: counts as answered by its own packet.
                self.settle(out.id(), out);
            } else {
                delivered += count;
            }
        }
        delivered
    }

    /// Record one branch's backward acknowledgement. Returns `false` when
    /// the ack matches no tracked branch.
    pub fn receive(&self, writer: &Writer, back: &Arc<Packet>) -> bool {
        let fwd = writer.take_link(back).unwrap_or_else(|| back.clone());
        self.settle(fwd.id(), back.clone())
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.groups.clear();
        state.routes.clear();
    }

    fn settle(&self, out_id: u64, ack: Arc<Packet>) -> bool {
        let finished = {
            let mut state = self.state.lock().unwrap();
            let Some(in_id) = state.routes.remove(&out_id) else {
                return false;
            };
            let Some(group) = state.groups.get_mut(&in_id) else {
                return false;
            };
            group.remaining -= 1;
            // Error acks win so the input's producer observes a failed branch.
            match &group.received {
                Some(prev) if prev.is_error() && !ack.is_error() => {}
                _ => group.received = Some(ack),
            }
            if group.remaining == 0 {
                state.groups.remove(&in_id)
            } else {
                None
            }
        };

        if let Some(group) = finished {
            let ack = group.received.unwrap_or_else(Packet::none);
            group.reader.receive_for(group.source_id, ack);
        }
        true
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
