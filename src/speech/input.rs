//! Dictation: toggling speech recognition and merging transcripts.

use crate::config::SttConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Speech-recognition collaborator.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Whether the runtime supports recognition at all. Checked before
    /// every start; unsupported engines keep the bridge idle.
    fn is_supported(&self) -> bool {
        true
    }

    /// Request microphone permission. Called once per session on the first
    /// user gesture or recording start ("priming"), so later starts don't
    /// prompt.
    async fn request_permission(&self) -> Result<()>;

    /// Begin continuous listening in `language`.
    async fn start_listening(&self, language: &str) -> Result<()>;

    /// Stop listening explicitly.
    async fn stop_listening(&self);

    /// The transcript accumulated since the last reset.
    fn transcript(&self) -> String;

    /// Clear the transcript buffer.
    fn reset_transcript(&self);

    /// Observe the engine's listening state. Flips to `false` when the
    /// engine stops on its own (user silence, engine timeout).
    fn listening(&self) -> watch::Receiver<bool>;
}

/// What a dictation transition asks the caller to do with the input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictationUpdate {
    /// No transition happened (disabled, unsupported, or start failure).
    Unchanged,
    /// Listening started; the input field stays as it is.
    Started,
    /// Manual stop: append this transcript to the current input value.
    Append(String),
}

/// Idle ⇄ Listening toggle around a [`RecognitionEngine`].
///
/// The caller is responsible for cancelling speech output before starting
/// dictation — input and output never run concurrently. The reverse is not
/// enforced: starting output does not stop dictation.
pub struct DictationBridge {
    engine: Arc<dyn RecognitionEngine>,
    config: SttConfig,
    recording: AtomicBool,
    mic_primed: AtomicBool,
}

impl DictationBridge {
    #[must_use]
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: SttConfig) -> Self {
        Self {
            engine,
            config,
            recording: AtomicBool::new(false),
            mic_primed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn RecognitionEngine> {
        &self.engine
    }

    /// Best-effort one-time microphone permission request. Denial is
    /// swallowed — the permission prompt stays the platform's business.
    pub async fn prime_microphone(&self) {
        if self.mic_primed.load(Ordering::SeqCst) {
            return;
        }
        match self.engine.request_permission().await {
            Ok(()) => self.mic_primed.store(true, Ordering::SeqCst),
            Err(e) => debug!("microphone priming failed: {e}"),
        }
    }

    /// Toggle between Idle and Listening.
    pub async fn toggle(&self) -> DictationUpdate {
        if !self.config.enabled {
            return DictationUpdate::Unchanged;
        }

        if self.is_recording() {
            self.recording.store(false, Ordering::SeqCst);
            self.engine.stop_listening().await;
            // Append, don't replace: supports several dictation bursts into
            // one message. The transcript resets on the next start.
            return DictationUpdate::Append(self.engine.transcript());
        }

        self.prime_microphone().await;
        self.recording.store(true, Ordering::SeqCst);
        self.engine.reset_transcript();

        if !self.engine.is_supported() {
            self.recording.store(false, Ordering::SeqCst);
            debug!("speech recognition not supported, staying idle");
            return DictationUpdate::Unchanged;
        }
        match self.engine.start_listening(&self.config.language).await {
            Ok(()) => DictationUpdate::Started,
            Err(e) => {
                warn!("failed to start listening: {e}");
                self.recording.store(false, Ordering::SeqCst);
                DictationUpdate::Unchanged
            }
        }
    }

    /// Handle an engine-driven stop (user silence, engine timeout).
    ///
    /// Returns the transcript the caller must use to *replace* the input
    /// value — unlike the manual-stop append — when listening ended while
    /// the bridge still thought it was recording. The transcript buffer is
    /// reset.
    pub fn listening_ended(&self) -> Option<String> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return None;
        }
        let transcript = self.engine.transcript();
        self.engine.reset_transcript();
        Some(transcript)
    }
}
