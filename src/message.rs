//! Message types for the conversation log.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Which side of the conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One turn in the conversation.
///
/// A message carries at least one of `content` or `image`; empty user sends
/// are rejected at the input boundary before a message is ever constructed.
/// Hosts may attach free-form metadata, which rides along in `extra` and
/// survives persistence round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier. When absent, `created_at` serves as the identity
    /// key (see [`Message::identity`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub sender: Sender,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Ordered base64-encoded raster images. Older logs stored a single
    /// string; both shapes deserialize to the list form.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub image: Option<Vec<String>>,
    /// Creation timestamp in epoch milliseconds. Set once, never mutated.
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    /// Open extension fields for host-specific metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a user message stamped with the current time.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::now(Sender::User, Some(content.into()))
    }

    /// Create a bot message stamped with the current time.
    #[must_use]
    pub fn bot(content: impl Into<String>) -> Self {
        Self::now(Sender::Bot, Some(content.into()))
    }

    fn now(sender: Sender, content: Option<String>) -> Self {
        Self {
            id: None,
            sender,
            content,
            image: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            extra: Map::new(),
        }
    }

    /// Attach an explicit identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach base64 image payloads.
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.image = Some(images);
        self
    }

    /// The key used to match this message across patch/remove calls:
    /// `id`, falling back to the stringified creation timestamp.
    ///
    /// Two messages created in the same millisecond without explicit ids
    /// are indistinguishable under this scheme. Hosts that stream patches
    /// should always supply ids.
    #[must_use]
    pub fn identity(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.created_at.to_string())
    }

    /// Whether this message should trigger speech output: a bot turn with
    /// non-empty text content.
    #[must_use]
    pub fn is_speakable(&self) -> bool {
        self.sender == Sender::Bot
            && self
                .content
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Partial message used by patch-or-upsert updates.
///
/// Present fields win over the existing message's fields; absent fields are
/// left untouched. Extension fields merge key-by-key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub image: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagePatch {
    /// A patch that only replaces the text body.
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Shallow-merge this patch into `target`, preserving `id` and
    /// `created_at`.
    pub fn apply(&self, target: &mut Message) {
        if let Some(sender) = self.sender {
            target.sender = sender;
        }
        if let Some(content) = &self.content {
            target.content = Some(content.clone());
        }
        if let Some(image) = &self.image {
            target.image = Some(image.clone());
        }
        for (k, v) in &self.extra {
            target.extra.insert(k.clone(), v.clone());
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        One(String),
        Many(Vec<String>),
    }

    Ok(Option::<Shape>::deserialize(deserializer)?.map(|s| match s {
        Shape::One(single) => vec![single],
        Shape::Many(list) => list,
    }))
}
