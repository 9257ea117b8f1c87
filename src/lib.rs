//! Palaver: embeddable chat messenger core.
//!
//! This crate provides the stateful heart of a chat widget — the part with
//! real state-machine behavior — while rendering stays with the host:
//!
//! - **Message store**: ordered log with append/patch-or-upsert/remove and
//!   declarative filter predicates over the visible subset
//! - **Settings**: typed, defaulted fields shaped by an ordered schema
//! - **Speech output**: sanitizer/chunker feeding a FIFO utterance queue
//!   with cancel-then-replace playback
//! - **Speech input**: dictation toggle with transcript merging
//! - **Attachments**: client-side image resize/re-encode to a byte budget
//! - **Persistence**: four JSON records behind a uniform async key-value
//!   port (file-backed string store or embedded SQLite)
//!
//! The host mounts [`Messenger`] with its collaborator engines, renders
//! from [`Messenger::visible_messages`] and the [`WidgetEvent`] stream, and
//! drives bot turns through the imperative handle.

pub mod attachment;
pub mod config;
pub mod error;
pub mod filter;
pub mod message;
pub mod persist;
pub mod settings;
pub mod speech;
pub mod store;
pub mod testing;
pub mod widget;

pub use config::{AttachmentConfig, MessengerConfig, PersistenceMode, SttConfig, TtsConfig};
pub use error::{MessengerError, Result};
pub use filter::{FilterSelection, FilterSpec, FilterState, SelectOption};
pub use message::{Message, MessagePatch, Sender};
pub use persist::{JsonFileStore, KvStore, RecordKeys, SqliteStore};
pub use settings::{SettingField, SettingValue, Settings};
pub use speech::{DictationBridge, RecognitionEngine, SpeechOutput, SynthesisEngine};
pub use widget::{Collaborators, Messenger, Outbound, SendHandler, WidgetEvent};
