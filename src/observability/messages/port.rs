// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for port lifecycle and acknowledgement events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// A port was closed, tearing down its per-Process streams.
pub struct PortClosed {
    pub kind: &'static str,
    pub streams: usize,
}

impl Display for PortClosed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Closed {} port with {} open streams", self.kind, self.streams)
    }
}

impl StructuredLog for PortClosed {
    fn log(&self) {
        tracing::debug!(kind = self.kind, streams = self.streams, "{}", self);
    }
}

/// An acknowledgement arrived with no matching outstanding read.
///
/// Logged at warn level: it usually indicates a double acknowledgement or
/// an ack issued after stream teardown.
pub struct AckUnmatched {
    pub packet_id: u64,
}

impl Display for AckUnmatched {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Acknowledgement for packet {} matched no outstanding read",
            self.packet_id
        )
    }
}

impl StructuredLog for AckUnmatched {
    fn log(&self) {
        tracing::warn!(packet_id = self.packet_id, "{}", self);
    }
}
