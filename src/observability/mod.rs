// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structured logging for kernel lifecycle events.
//!
//! Message types follow a struct-based pattern with `Display`
//! implementations so diagnostic output stays consistent and free of magic
//! strings. Messages are organized by subsystem:
//!
//! * `messages::process` - Process fork/exit lifecycle
//! * `messages::port` - port close and acknowledgement anomalies

pub mod messages;
