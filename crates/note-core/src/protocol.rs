//! Wire protocol for edit sessions.
//!
//! Text WebSocket frames carrying JSON. Every message is a tagged envelope
//! `{"type": ..., "entity": ...}` with a closed set of types; an unknown
//! type is a decode error, never a passthrough.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Content, ContentKind, LineProperty};
use crate::service::LineView;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Messages the server sends. Exactly one `current` snapshot opens every
/// session; nothing else is ever pushed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "entity", rename_all = "lowercase")]
pub enum ServerMessage {
    Current(Vec<LineFrame>),
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Mutations a client may send, decoded once and dispatched by variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "entity", rename_all = "lowercase")]
pub enum ClientMessage {
    Insert(InsertLine),
    Move(MoveLine),
    Update(EditLine),
    Delete(DeleteLine),
}

impl ClientMessage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertLine {
    pub to: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveLine {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditLine {
    pub order: u32,
    #[serde(default)]
    pub property: Option<PropertyFrame>,
    #[serde(default)]
    pub contents: Vec<ContentFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteLine {
    pub to: u32,
}

/// A line in the `current` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineFrame {
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyFrame>,
    pub contents: Vec<ContentFrame>,
}

impl From<&LineView> for LineFrame {
    fn from(view: &LineView) -> Self {
        Self {
            order: view.order.get(),
            property: view.property.map(|p| PropertyFrame { kind: p.kind }),
            contents: view.contents.iter().filter_map(ContentFrame::from_content).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PropertyFrame {
    #[serde(rename = "type")]
    pub kind: crate::model::PropertyKind,
}

impl From<PropertyFrame> for LineProperty {
    fn from(frame: PropertyFrame) -> Self {
        LineProperty { kind: frame.kind }
    }
}

/// A content block on the wire: a closed type tag plus an entity body the
/// core stores verbatim and never interprets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentFrame {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub entity: Value,
}

impl ContentFrame {
    /// Materialize a wire frame into an owned content block with a fresh id.
    pub fn into_content(self) -> Content {
        let value =
            serde_json::to_vec(&self.entity).expect("JSON value serialization should not fail");
        Content {
            id: Uuid::new_v4(),
            kind: self.kind,
            value,
        }
    }

    /// Rebuild a frame from a stored content block.
    ///
    /// A block whose stored body is not valid JSON is dropped from the
    /// snapshot rather than poisoning it.
    pub fn from_content(content: &Content) -> Option<Self> {
        let entity = serde_json::from_slice(&content.value).ok()?;
        Some(Self {
            kind: content.kind,
            entity,
        })
    }
}
