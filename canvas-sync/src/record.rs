//! Canvas records: the identity-bearing units of document state.
//!
//! The payload is opaque to the sync engine. Only `id` matters for
//! reconciliation; `kind` is carried so stores can index by it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Stable, string-valued record identity (e.g. `shape:4f1c…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id prefixed with the record kind.
    pub fn generate(kind: RecordKind) -> Self {
        Self(format!("{}:{}", kind.prefix(), Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a record describes on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Shape,
    Binding,
    Page,
}

impl RecordKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordKind::Shape => "shape",
            RecordKind::Binding => "binding",
            RecordKind::Page => "page",
        }
    }
}

/// One record of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    pub payload: Value,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, kind: RecordKind, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
        }
    }

    pub fn shape(id: impl Into<RecordId>, payload: Value) -> Self {
        Self::new(id, RecordKind::Shape, payload)
    }

    pub fn binding(id: impl Into<RecordId>, payload: Value) -> Self {
        Self::new(id, RecordKind::Binding, payload)
    }

    pub fn page(id: impl Into<RecordId>, payload: Value) -> Self {
        Self::new(id, RecordKind::Page, payload)
    }

    /// Same identity, new payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
