// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for Process lifecycle events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// A child process was forked from a parent.
pub struct ProcessForked {
    pub parent_id: u64,
    pub child_id: u64,
}

impl Display for ProcessForked {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Forked process {} from parent {}",
            self.child_id, self.parent_id
        )
    }
}

impl StructuredLog for ProcessForked {
    fn log(&self) {
        tracing::debug!(
            parent_id = self.parent_id,
            child_id = self.child_id,
            "{}",
            self
        );
    }
}

/// A process exited, possibly with an advisory error.
pub struct ProcessExited {
    pub process_id: u64,
    pub error: Option<String>,
}

impl Display for ProcessExited {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match &self.error {
            Some(err) => write!(f, "Process {} exited with error: {}", self.process_id, err),
            None => write!(f, "Process {} exited", self.process_id),
        }
    }
}

impl StructuredLog for ProcessExited {
    fn log(&self) {
        match &self.error {
            Some(err) => tracing::debug!(process_id = self.process_id, error = %err, "{}", self),
            None => tracing::debug!(process_id = self.process_id, "{}", self),
        }
    }
}
