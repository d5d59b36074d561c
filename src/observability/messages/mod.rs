// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.

pub mod port;
pub mod process;

/// Emit the message through `tracing` with its structured fields attached.
pub trait StructuredLog {
    fn log(&self);
}
