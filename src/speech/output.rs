//! Serialized text-to-speech playback.
//!
//! At most one utterance plays at a time; queued chunks play back-to-back
//! without re-initializing the engine. A new `speak` request always
//! preempts the current one (cancel-then-replace), and engine errors
//! advance the queue exactly like normal completion.

use crate::config::TtsConfig;
use crate::speech::sanitize::{MAX_CHUNK_LEN, chunk};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long to wait for the engine's voice list before giving up.
///
/// Real engines load voices asynchronously and may never fire the ready
/// event at all (headless environments), so resolution races this timeout.
const VOICE_WAIT_TIMEOUT: Duration = Duration::from_millis(1200);

/// Pause before each utterance so the UI settles between chunks.
const UTTERANCE_SETTLE: Duration = Duration::from_millis(80);

/// One synthesis voice as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP-47 language tag.
    pub language: String,
    pub uri: String,
}

/// One unit of text submitted to the engine for vocalization.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Explicit voice, or `None` for the engine default.
    pub voice: Option<Voice>,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
}

/// How an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    /// Synthesis failed; playback continues with the next chunk.
    Failed,
}

/// Speech-synthesis collaborator.
///
/// Implementations wrap a platform engine; the widget only ever drives this
/// trait, which keeps engines swappable and testable.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Currently known voices. May be empty while the engine is still
    /// loading its list.
    fn voices(&self) -> Vec<Voice>;

    /// Resolves once when the voice list changes. May never resolve;
    /// callers race it against a timeout.
    async fn voices_changed(&self) {
        std::future::pending::<()>().await;
    }

    /// Play one utterance to completion. Resolves on playback end *or*
    /// synthesis error; cancellation happens out-of-band via [`cancel`].
    ///
    /// [`cancel`]: SynthesisEngine::cancel
    async fn speak(&self, utterance: Utterance) -> SpeakOutcome;

    /// Stop any in-flight playback immediately.
    fn cancel(&self);
}

struct Shared {
    queue: Mutex<VecDeque<String>>,
    speaking: AtomicBool,
    // Outer None: not resolved yet. Inner None: resolved to engine default.
    cached_voice: Mutex<Option<Option<Voice>>>,
    cancel: Mutex<CancellationToken>,
}

/// FIFO utterance queue with sequential playback and total cancellation.
pub struct SpeechOutput {
    engine: Arc<dyn SynthesisEngine>,
    config: TtsConfig,
    shared: Arc<Shared>,
}

impl SpeechOutput {
    #[must_use]
    pub fn new(engine: Arc<dyn SynthesisEngine>, config: TtsConfig) -> Self {
        Self {
            engine,
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                speaking: AtomicBool::new(false),
                cached_voice: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Queue `text` for playback, preempting anything currently speaking.
    ///
    /// No-op when speech output is disabled, `muted` is set, or the text
    /// reduces to nothing speakable.
    pub fn speak(&self, text: &str, muted: bool) {
        if !self.config.enabled || muted {
            return;
        }
        let chunks = chunk(text, MAX_CHUNK_LEN);
        if chunks.is_empty() {
            return;
        }

        self.cancel();
        let token = CancellationToken::new();
        *self.shared.cancel.lock().expect("cancel lock") = token.clone();
        *self.shared.queue.lock().expect("queue lock") = chunks.into();

        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        tokio::spawn(async move {
            playback_loop(engine, shared, config, token).await;
        });
    }

    /// Stop the engine, drop the active utterance, and empty the queue.
    pub fn cancel(&self) {
        self.shared.cancel.lock().expect("cancel lock").cancel();
        self.engine.cancel();
        self.shared.queue.lock().expect("queue lock").clear();
        self.shared.speaking.store(false, Ordering::SeqCst);
    }

    /// Whether an utterance is currently playing.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }
}

async fn playback_loop(
    engine: Arc<dyn SynthesisEngine>,
    shared: Arc<Shared>,
    config: TtsConfig,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let next = shared.queue.lock().expect("queue lock").pop_front();
        let Some(text) = next else { break };

        tokio::time::sleep(UTTERANCE_SETTLE).await;
        if token.is_cancelled() {
            break;
        }

        let voice = ensure_voice(engine.as_ref(), &config, &shared).await;
        let utterance = Utterance {
            text,
            voice,
            pitch: 1.0,
            rate: 0.95,
            volume: 1.0,
        };

        shared.speaking.store(true, Ordering::SeqCst);
        tokio::select! {
            outcome = engine.speak(utterance) => {
                if outcome == SpeakOutcome::Failed {
                    // Same as completion: move on to the next chunk.
                    debug!("utterance failed, continuing with next chunk");
                }
            }
            () = token.cancelled() => {
                shared.speaking.store(false, Ordering::SeqCst);
                break;
            }
        }
        shared.speaking.store(false, Ordering::SeqCst);
    }
    shared.speaking.store(false, Ordering::SeqCst);
}

/// Resolve the session voice, racing the engine's voice-list readiness
/// against [`VOICE_WAIT_TIMEOUT`]. The result (including "no match, use the
/// engine default") is cached for the session.
async fn ensure_voice(
    engine: &dyn SynthesisEngine,
    config: &TtsConfig,
    shared: &Shared,
) -> Option<Voice> {
    if let Some(resolved) = shared.cached_voice.lock().expect("voice lock").clone() {
        return resolved;
    }

    let mut voices = engine.voices();
    if voices.is_empty() {
        tokio::select! {
            () = engine.voices_changed() => {}
            () = tokio::time::sleep(VOICE_WAIT_TIMEOUT) => {}
        }
        voices = engine.voices();
    }

    let picked = pick_voice(&voices, &config.language, &config.voice_includes);
    *shared.cached_voice.lock().expect("voice lock") = Some(picked.clone());
    picked
}

/// Voice preference: exact language match combined with the first name/URI
/// hint hit, then the first language-filtered voice, then the engine
/// default.
#[must_use]
pub fn pick_voice(voices: &[Voice], language: &str, hints: &[String]) -> Option<Voice> {
    let filtered: Vec<&Voice> = if language.is_empty() {
        voices.iter().collect()
    } else {
        voices
            .iter()
            .filter(|v| v.language.eq_ignore_ascii_case(language))
            .collect()
    };

    for hint in hints {
        let needle = hint.to_lowercase();
        if let Some(hit) = filtered.iter().find(|v| {
            v.name.to_lowercase().contains(&needle) || v.uri.to_lowercase().contains(&needle)
        }) {
            return Some((*hit).clone());
        }
    }
    filtered.first().map(|v| (*v).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSynthesis;

    fn voice(name: &str, language: &str) -> Voice {
        Voice {
            name: name.into(),
            language: language.into(),
            uri: format!("urn:voice:{name}"),
        }
    }

    fn tts_config() -> TtsConfig {
        TtsConfig {
            enabled: true,
            default_on: true,
            language: "de-DE".into(),
            voice_includes: vec!["katja".into(), "google".into()],
        }
    }

    #[test]
    fn pick_voice_prefers_language_and_hint() {
        let voices = vec![
            voice("Alice", "en-US"),
            voice("Google Deutsch", "de-DE"),
            voice("Katja", "de-DE"),
        ];
        let hints = vec!["katja".to_owned(), "google".to_owned()];
        let picked = pick_voice(&voices, "de-DE", &hints).expect("voice");
        assert_eq!(picked.name, "Katja");
    }

    #[test]
    fn pick_voice_falls_back_to_first_language_match() {
        let voices = vec![voice("Alice", "en-US"), voice("Bernd", "de-DE")];
        let picked = pick_voice(&voices, "de-DE", &["nomatch".into()]).expect("voice");
        assert_eq!(picked.name, "Bernd");
    }

    #[test]
    fn pick_voice_yields_none_when_nothing_matches() {
        let voices = vec![voice("Alice", "en-US")];
        assert!(pick_voice(&voices, "de-DE", &[]).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn speak_plays_chunks_in_order() {
        let engine = Arc::new(MockSynthesis::new(vec![voice("Katja", "de-DE")]));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("First one. Second one.", false);
        engine.wait_for_spoken(2).await;
        assert_eq!(engine.spoken(), vec!["First one.", "Second one."]);
    }

    #[tokio::test(start_paused = true)]
    async fn muted_speak_is_a_noop() {
        let engine = Arc::new(MockSynthesis::new(vec![]));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("Hello.", true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_sensible_to_say_is_a_noop() {
        let engine = Arc::new(MockSynthesis::new(vec![]));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("...", false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_advances_the_queue() {
        let engine = Arc::new(MockSynthesis::new(vec![voice("Katja", "de-DE")]));
        engine.fail_next(1);
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("Bad chunk. Good chunk.", false);
        engine.wait_for_spoken(2).await;
        assert_eq!(engine.spoken(), vec!["Bad chunk.", "Good chunk."]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_speak_preempts_the_old_queue() {
        let engine = Arc::new(MockSynthesis::new(vec![voice("Katja", "de-DE")]));
        engine.set_utterance_duration(Duration::from_millis(500));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("Old one. Old two. Old three.", false);
        engine.wait_for_spoken(1).await;
        output.speak("New text.", false);
        engine.wait_for_spoken_text("New text.").await;
        assert!(!engine.spoken().contains(&"Old three.".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_voice_list_times_out_to_engine_default() {
        let engine = Arc::new(MockSynthesis::new(vec![]));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("Hello there.", false);
        engine.wait_for_spoken(1).await;
        assert_eq!(engine.last_voice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silences_everything() {
        let engine = Arc::new(MockSynthesis::new(vec![voice("Katja", "de-DE")]));
        engine.set_utterance_duration(Duration::from_millis(500));
        let output = SpeechOutput::new(engine.clone(), tts_config());
        output.speak("One. Two. Three. Four.", false);
        engine.wait_for_spoken(1).await;
        output.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(engine.spoken().len() < 4, "queue kept playing after cancel");
        assert!(!output.is_speaking());
    }
}
