//! Key-value persistence port and its backends.
//!
//! The widget treats both backends as one uniform async get/set/delete
//! interface keyed by strings, carrying JSON values. Implementations own
//! every storage detail; no driver types appear in the trait.

mod json_file;
mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Uniform async key-value port over the persistence backends.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove the value stored under `key`; no-op if absent.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// The four record keys owned by one widget instance, under its configured
/// storage prefix.
#[derive(Debug, Clone)]
pub struct RecordKeys {
    prefix: String,
}

impl RecordKeys {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The message log record.
    #[must_use]
    pub fn messages(&self) -> String {
        format!("{}:messages", self.prefix)
    }

    /// The settings map record.
    #[must_use]
    pub fn settings(&self) -> String {
        format!("{}:settings", self.prefix)
    }

    /// The speech-output mute flag record.
    #[must_use]
    pub fn tts_muted(&self) -> String {
        format!("{}:ttsMuted", self.prefix)
    }

    /// The filter selection record.
    #[must_use]
    pub fn filters(&self) -> String {
        format!("{}:filters", self.prefix)
    }

    /// All four record keys.
    #[must_use]
    pub fn all(&self) -> [String; 4] {
        [
            self.messages(),
            self.settings(),
            self.tts_muted(),
            self.filters(),
        ]
    }
}
