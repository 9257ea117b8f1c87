//! Configuration types for the messenger widget.

use crate::message::Message;
use crate::settings::SettingField;
use serde::{Deserialize, Serialize};

/// Top-level configuration for a messenger instance.
///
/// Filter specs and the collaborator engines are not part of this struct —
/// they carry closures and trait objects and ride in
/// [`crate::widget::Collaborators`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Key prefix for the four persisted records.
    pub storage_key: String,
    /// Enable the string-keyed persistence backend.
    pub persist: bool,
    /// Enable the binary-object persistence backend.
    ///
    /// Takes precedence over `persist` when both are set.
    pub is_index_db: bool,
    /// Placeholder/label for the text input.
    pub input_placeholder: String,
    /// Seed message log used when no persisted data exists.
    pub initial_messages: Vec<Message>,
    /// Ordered settings field descriptors.
    pub settings_schema: Vec<SettingField>,
    /// Speech output settings.
    pub tts: TtsConfig,
    /// Speech input settings.
    pub stt: SttConfig,
    /// Image attachment settings.
    pub attachment: AttachmentConfig,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            storage_key: "messenger".into(),
            persist: false,
            is_index_db: false,
            input_placeholder: "Send message...".into(),
            initial_messages: Vec::new(),
            settings_schema: Vec::new(),
            tts: TtsConfig::default(),
            stt: SttConfig::default(),
            attachment: AttachmentConfig::default(),
        }
    }
}

/// Which persistence backend a configuration resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// No persistence; hydration seeds from `initial_messages` only.
    Disabled,
    /// String-keyed store (JSON strings by key).
    StringStore,
    /// Binary-object store (embedded document database).
    DocumentStore,
}

impl MessengerConfig {
    /// Resolve the backend flags; `is_index_db` wins when both are set.
    #[must_use]
    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.is_index_db {
            PersistenceMode::DocumentStore
        } else if self.persist {
            PersistenceMode::StringStore
        } else {
            PersistenceMode::Disabled
        }
    }
}

/// Speech output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether speech output is available at all.
    pub enabled: bool,
    /// Whether speech output starts unmuted.
    pub default_on: bool,
    /// BCP-47 language tag used to filter the voice list.
    pub language: String,
    /// Voice name/URI hints tried in order within the language-filtered
    /// list; first hit wins.
    pub voice_includes: Vec<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_on: true,
            language: "de-DE".into(),
            voice_includes: vec!["katja".into(), "microsoft".into(), "google".into()],
        }
    }
}

/// Speech input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Whether dictation is available at all.
    pub enabled: bool,
    /// BCP-47 language tag passed to the recognition engine.
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "de-DE".into(),
        }
    }
}

/// Preferred encoding for outgoing image attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredFormat {
    /// Lossy default.
    Jpeg,
    /// Lossless; also kept automatically for transparent PNG sources.
    Png,
    /// Not encodable by this runtime; falls back to JPEG.
    WebP,
}

/// Image attachment pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Longest edge of the re-encoded image, in pixels.
    pub max_side: u32,
    /// Byte budget for the encoded payload (pre-base64).
    pub max_bytes: usize,
    /// Encoding format to try first.
    pub preferred_format: PreferredFormat,
    /// Initial encode quality, 0–100. Lowered in fixed steps down to the
    /// quality floor when the payload exceeds `max_bytes`.
    pub quality: u8,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_side: 1280,
            max_bytes: 256 * 1024,
            preferred_format: PreferredFormat::Jpeg,
            quality: 85,
        }
    }
}
