//! The ordered message log and its mutation operations.
//!
//! `MessageStore` is a plain state container: it owns the `Vec<Message>` and
//! the patch/upsert/remove rules, and reports which appended or patched text
//! deserves speech output. Side effects (persistence writes, actually
//! speaking) belong to the orchestrator in [`crate::widget`].

use crate::message::{Message, MessagePatch, Sender};

/// Ordered conversation log with patch-or-upsert semantics.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole log (hydration).
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// All messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append messages, preserving arrival order.
    ///
    /// Returns the text of the first appended bot message with non-empty
    /// content, if any — the one the orchestrator voices. Only the first
    /// match in the batch wins.
    pub fn append(&mut self, batch: Vec<Message>) -> Option<String> {
        let speakable = batch
            .iter()
            .find(|m| m.is_speakable())
            .and_then(|m| m.content.clone());
        self.messages.extend(batch);
        speakable
    }

    /// Patch the message whose identity key equals `id`, or upsert a new
    /// bot message stamped now when no match exists.
    ///
    /// Returns the patched text when the patch carried non-empty content
    /// (the orchestrator voices it when speech output is on).
    pub fn patch(&mut self, id: &str, patch: &MessagePatch) -> Option<String> {
        if id.is_empty() {
            return None;
        }
        match self.messages.iter_mut().find(|m| m.identity() == id) {
            Some(existing) => {
                patch.apply(existing);
                // A message matched by its timestamp key gains the explicit
                // id so later patches keep hitting the same message.
                if existing.id.is_none() {
                    existing.id = Some(id.to_owned());
                }
            }
            None => {
                let upserted = Message {
                    id: Some(id.to_owned()),
                    sender: patch.sender.unwrap_or(Sender::Bot),
                    content: patch.content.clone(),
                    image: patch.image.clone(),
                    created_at: chrono::Utc::now().timestamp_millis(),
                    extra: patch.extra.clone(),
                };
                self.messages.push(upserted);
            }
        }

        patch
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_owned)
    }

    /// Remove the message whose identity key equals `id`; no-op if absent.
    pub fn remove(&mut self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.messages.retain(|m| m.identity() != id);
    }

    /// Empty the log.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// The most recent bot message with text content, if any.
    #[must_use]
    pub fn last_speakable(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Bot && m.content.as_deref().is_some_and(|c| !c.is_empty()))
    }
}
