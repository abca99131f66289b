//! Domain model: notes, lines, line properties, content blocks and mentions.
//!
//! A note is a pure container for an ordered sequence of lines. A line may
//! carry one property (a structural tag stored apart from the ordering) and
//! any number of content blocks, which are owned by the content store and
//! attached through a mention of kind `line`.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::order::OrderNumber;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown property type: {0}")]
    UnknownProperty(String),
    #[error("unknown content type: {0}")]
    UnknownContent(String),
}

/// A note: container for an ordered sequence of lines.
///
/// Created once when its owning resource (user profile, community
/// description) is provisioned, never updated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub id: Uuid,
}

impl Note {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

/// One addressable, reorderable unit within a note.
///
/// The property is side metadata; line stores return it unpopulated and the
/// service attaches it from the property store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub id: Uuid,
    pub note_id: Uuid,
    pub order: OrderNumber,
    pub property: Option<LineProperty>,
}

/// Optional structural tag on a line, stored independently of ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProperty {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
}

/// The closed set of line property tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Toggle,
    Blockquote,
    Callout,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Toggle => "toggle",
            PropertyKind::Blockquote => "blockquote",
            PropertyKind::Callout => "callout",
        }
    }
}

impl Display for PropertyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle" => Ok(PropertyKind::Toggle),
            "blockquote" => Ok(PropertyKind::Blockquote),
            "callout" => Ok(PropertyKind::Callout),
            other => Err(ModelError::UnknownProperty(other.to_string())),
        }
    }
}

/// An opaque typed payload attached to a mentionable entity.
///
/// `value` holds the JSON entity body exactly as it arrived on the wire;
/// the core never interprets it beyond the type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub id: Uuid,
    pub kind: ContentKind,
    pub value: Vec<u8>,
}

/// The closed set of content block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Heading,
    List,
    Checkbox,
    Radiobutton,
    /// Horizontal rule.
    Line,
    Img,
    Mention,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Heading => "heading",
            ContentKind::List => "list",
            ContentKind::Checkbox => "checkbox",
            ContentKind::Radiobutton => "radiobutton",
            ContentKind::Line => "line",
            ContentKind::Img => "img",
            ContentKind::Mention => "mention",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "heading" => Ok(ContentKind::Heading),
            "list" => Ok(ContentKind::List),
            "checkbox" => Ok(ContentKind::Checkbox),
            "radiobutton" => Ok(ContentKind::Radiobutton),
            "line" => Ok(ContentKind::Line),
            "img" => Ok(ContentKind::Img),
            "mention" => Ok(ContentKind::Mention),
            other => Err(ModelError::UnknownContent(other.to_string())),
        }
    }
}

/// The entity kinds the note core attaches data to.
///
/// `User` and `Community` own notes; `Line`, `Topic` and `Post` own content
/// sets. The wider platform has more resources, none of which reach this
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    User,
    Community,
    Line,
    Topic,
    Post,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::User => "user",
            Resource::Community => "community",
            Resource::Line => "line",
            Resource::Topic => "topic",
            Resource::Post => "post",
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (resource kind, resource id) reference used to attach owned data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mention {
    pub resource: Resource,
    pub id: Uuid,
}

impl Mention {
    pub fn new(resource: Resource, id: Uuid) -> Self {
        Self { resource, id }
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(Resource::User, id)
    }

    pub fn community(id: Uuid) -> Self {
        Self::new(Resource::Community, id)
    }

    pub fn line(id: Uuid) -> Self {
        Self::new(Resource::Line, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_kind_round_trip() {
        for kind in [
            PropertyKind::Toggle,
            PropertyKind::Blockquote,
            PropertyKind::Callout,
        ] {
            assert_eq!(kind.as_str().parse::<PropertyKind>().unwrap(), kind);
        }
        assert!("banner".parse::<PropertyKind>().is_err());
    }

    #[test]
    fn test_content_kind_round_trip() {
        for kind in [
            ContentKind::Text,
            ContentKind::Heading,
            ContentKind::List,
            ContentKind::Checkbox,
            ContentKind::Radiobutton,
            ContentKind::Line,
            ContentKind::Img,
            ContentKind::Mention,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
        assert!("table".parse::<ContentKind>().is_err());
    }

    #[test]
    fn test_property_serde_uses_type_tag() {
        let property = LineProperty {
            kind: PropertyKind::Callout,
        };
        assert_eq!(
            serde_json::to_string(&property).unwrap(),
            r#"{"type":"callout"}"#
        );
    }
}
