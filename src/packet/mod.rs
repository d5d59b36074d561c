// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod packet;
pub mod tracer;

pub use packet::{ErrorPayload, Packet, Payload};
pub use tracer::{Hook, Tracer};
