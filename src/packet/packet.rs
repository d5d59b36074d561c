// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Immutable message envelopes.
//!
//! A [`Packet`] wraps exactly one payload value and carries a stable identity
//! used as the correlation key by the tracer, bridge, and collector. Packets
//! are never mutated after creation; "derived" packets are new values linked
//! to their ancestors through the [`Tracer`](crate::packet::Tracer).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Identity 0 is reserved for the shared `none` sentinel; real packets start
/// at 1.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static NONE: OnceLock<Arc<Packet>> = OnceLock::new();

/// Structured error detail carried by error-tagged packets.
///
/// Errors travel through the graph as ordinary data on `error` ports; this is
/// the payload shape they use.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
        }
    }

    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ErrorPayload {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The polymorphic value a packet carries: either a structured value or an
/// error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Value(Value),
    Error(ErrorPayload),
}

/// Immutable message envelope flowing through the graph.
#[derive(Debug)]
pub struct Packet {
    id: u64,
    payload: Payload,
}

impl Packet {
    /// Wrap a structured value in a fresh packet.
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            payload: Payload::Value(value),
        })
    }

    /// Wrap an error detail in a fresh error-tagged packet.
    pub fn error(err: impl Into<ErrorPayload>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            payload: Payload::Error(err.into()),
        })
    }

    /// The shared sentinel meaning "processed, no output".
    pub fn none() -> Arc<Self> {
        NONE.get_or_init(|| {
            Arc::new(Self {
                id: 0,
                payload: Payload::Value(Value::Null),
            })
        })
        .clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The structured value, if this is not an error packet.
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            Payload::Error(_) => None,
        }
    }

    /// The error detail, if this is an error packet.
    pub fn err(&self) -> Option<&ErrorPayload> {
        match &self.payload {
            Payload::Value(_) => None,
            Payload::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn is_none(&self) -> bool {
        self.id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_identity_is_unique() {
        let a = Packet::new(json!("a"));
        let b = Packet::new(json!("a"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_none_is_shared_sentinel() {
        let a = Packet::none();
        let b = Packet::none();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_none());
        assert_eq!(a.id(), 0);
    }

    #[test]
    fn test_value_and_error_accessors() {
        let v = Packet::new(json!({"k": 1}));
        assert!(!v.is_error());
        assert_eq!(v.value(), Some(&json!({"k": 1})));
        assert!(v.err().is_none());

        let e = Packet::error(ErrorPayload::new("boom"));
        assert!(e.is_error());
        assert!(e.value().is_none());
        assert_eq!(e.err().unwrap().message, "boom");
        assert_eq!(e.err().unwrap().code, 500);
    }

    #[test]
    fn test_error_payload_from_anyhow() {
        let err: ErrorPayload = anyhow::anyhow!("bad input").into();
        assert_eq!(err.message, "bad input");
    }
}
