// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod errors;        // error handling
pub mod node;          // node shapes + fan coordinators
pub mod observability;
pub mod packet;        // packets + causality tracing
pub mod port;          // ports, readers, writers
pub mod process;       // execution contexts
