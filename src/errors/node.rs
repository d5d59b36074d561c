// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for node port lookup and wiring.

use thiserror::Error;

/// Errors surfaced by the node-shape port accessors.
///
/// These are programmer/wiring errors, not data-flow failures: runtime
/// failures travel through the graph as error-tagged packets on `error`
/// ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node owns no port under this name.
    #[error("unknown port '{name}'")]
    UnknownPort { name: String },
}

impl NodeError {
    pub fn unknown_port(name: impl Into<String>) -> Self {
        Self::UnknownPort { name: name.into() }
    }
}
