//! Widget orchestration: hydration, side-effect wiring, and the imperative
//! handle the host drives.
//!
//! `Messenger` is a cheaply cloneable handle over shared state. The host
//! mounts it with its collaborators, renders from `visible_messages()` and
//! the event stream, and pushes bot turns back in through `add_messages` /
//! `update_message` (streaming via repeated patches to one id).

use crate::config::MessengerConfig;
use crate::error::Result;
use crate::filter::{self, FilterSelection, FilterSpec, FilterState};
use crate::message::{Message, MessagePatch, Sender};
use crate::persist::{KvStore, RecordKeys};
use crate::settings::{SettingValue, Settings};
use crate::speech::input::{DictationBridge, DictationUpdate, RecognitionEngine};
use crate::speech::output::{SpeechOutput, SynthesisEngine};
use crate::store::MessageStore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Map;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Placeholder content a host streams while the bot is "typing". The
/// autoscroll signal is suppressed for it to avoid jitter during streamed
/// placeholder updates.
const TYPING_PLACEHOLDER: &str = "...";

/// Payload handed to the host's send callback.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// The text as typed (untrimmed).
    pub text: String,
    /// Whether an image attachment rode along.
    pub is_image: bool,
    /// Snapshot of the settings map at send time.
    pub settings: Settings,
}

/// Host callback invoked on every user send.
///
/// The widget handle is passed back so bot turns can be appended or
/// patched from inside the callback.
#[async_trait]
pub trait SendHandler: Send + Sync {
    async fn on_send(&self, outbound: Outbound, widget: Messenger);
}

/// State-change notifications for the host renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    MessagesChanged,
    /// Scroll the end-of-list anchor into view.
    ScrollToEnd,
    InputChanged(String),
    RecordingChanged(bool),
    MuteChanged(bool),
    SettingsChanged,
    FiltersChanged,
}

/// External collaborators injected at mount.
///
/// `kv` is the backend matching [`MessengerConfig::persistence_mode`];
/// `None` disables persistence entirely.
pub struct Collaborators {
    pub on_send: Arc<dyn SendHandler>,
    pub synthesis: Arc<dyn SynthesisEngine>,
    pub recognition: Arc<dyn RecognitionEngine>,
    pub kv: Option<Arc<dyn KvStore>>,
    pub filters: Vec<FilterSpec>,
}

struct WidgetState {
    store: MessageStore,
    input: String,
    show_settings: bool,
    tts_muted: bool,
    settings: Settings,
    filter_state: FilterState,
    /// Pending base64 attachment for the next send.
    attachment: Option<String>,
    /// Set once hydration finished; persistence writes are inert before
    /// that so transient defaults never clobber stored records.
    hydrated: bool,
}

struct Inner {
    config: MessengerConfig,
    filters: Vec<FilterSpec>,
    keys: RecordKeys,
    kv: Option<Arc<dyn KvStore>>,
    output: SpeechOutput,
    dictation: DictationBridge,
    on_send: Arc<dyn SendHandler>,
    state: Mutex<WidgetState>,
    events: mpsc::UnboundedSender<WidgetEvent>,
    gesture_seen: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Teardown always silences speech output.
        self.output.cancel();
    }
}

/// The messenger widget handle.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

impl Messenger {
    /// Mount the widget: seed state, hydrate the four persisted records,
    /// and wire the recognition watcher. Returns the handle and the event
    /// stream the renderer consumes.
    pub async fn mount(
        config: MessengerConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<WidgetEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let keys = RecordKeys::new(config.storage_key.clone());
        let state = WidgetState {
            store: MessageStore::new(),
            input: String::new(),
            show_settings: false,
            tts_muted: !config.tts.default_on,
            settings: Settings::from_schema(&config.settings_schema),
            filter_state: filter::empty_state(&collaborators.filters),
            attachment: None,
            hydrated: false,
        };
        let widget = Self {
            inner: Arc::new(Inner {
                output: SpeechOutput::new(collaborators.synthesis, config.tts.clone()),
                dictation: DictationBridge::new(collaborators.recognition, config.stt.clone()),
                filters: collaborators.filters,
                keys,
                kv: collaborators.kv,
                on_send: collaborators.on_send,
                config,
                state: Mutex::new(state),
                events,
                gesture_seen: AtomicBool::new(false),
            }),
        };
        widget.hydrate().await;
        widget.spawn_listening_watcher();
        (widget, rx)
    }

    fn state(&self) -> MutexGuard<'_, WidgetState> {
        self.inner.state.lock().expect("widget state lock")
    }

    fn emit(&self, event: WidgetEvent) {
        // A dropped receiver just means nobody is rendering right now.
        let _ = self.inner.events.send(event);
    }

    /// Read all four records (or none, when persistence is off) and seed
    /// the in-memory state. Write-back stays inert until this completes.
    async fn hydrate(&self) {
        let Some(kv) = self.inner.kv.clone() else {
            let mut state = self.state();
            state
                .store
                .replace(self.inner.config.initial_messages.clone());
            state.hydrated = true;
            drop(state);
            self.emit_message_events(false);
            return;
        };

        let keys = &self.inner.keys;
        let messages: Option<Vec<Message>> = read_record(kv.as_ref(), &keys.messages()).await;
        let settings: Option<Settings> = read_record(kv.as_ref(), &keys.settings()).await;
        let muted: Option<bool> = read_record(kv.as_ref(), &keys.tts_muted()).await;
        let filters: Option<FilterState> = read_record(kv.as_ref(), &keys.filters()).await;

        let mut state = self.state();
        state
            .store
            .replace(messages.unwrap_or_else(|| self.inner.config.initial_messages.clone()));
        if let Some(settings) = settings {
            state.settings = settings;
        }
        if let Some(muted) = muted {
            state.tts_muted = muted;
        }
        if let Some(filters) = filters {
            state.filter_state = filters;
        }
        state.hydrated = true;
        info!(
            "hydrated {} messages under key prefix {:?}",
            state.store.len(),
            self.inner.config.storage_key
        );
        drop(state);
        self.emit_message_events(false);
    }

    /// Whether hydration has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().hydrated
    }

    // ---- imperative handle -------------------------------------------

    /// Append messages to the log. The first appended bot message with
    /// text content is voiced (when speech output is on and unmuted).
    pub fn add_messages(&self, batch: Vec<Message>) {
        let spoken = self.state().store.append(batch);
        self.emit_message_events(true);
        if let Some(text) = spoken {
            self.speak_if_audible(&text);
        }
    }

    /// Patch the message with identity `id`, or upsert a bot message when
    /// no match exists. Non-empty patched text is voiced.
    pub fn update_message(&self, id: &str, patch: &MessagePatch) {
        let spoken = self.state().store.patch(id, patch);
        self.emit_message_events(true);
        if let Some(text) = spoken {
            self.speak_if_audible(&text);
        }
    }

    /// Remove the message with identity `id`; no-op when absent.
    pub fn remove_message(&self, id: &str) {
        self.state().store.remove(id);
        self.emit_message_events(true);
    }

    /// Empty the log and drop the persisted message record.
    pub fn clear(&self) {
        self.state().store.clear();
        if let Some(kv) = self.inner.kv.clone() {
            let key = self.inner.keys.messages();
            tokio::spawn(async move {
                if let Err(e) = kv.delete(&key).await {
                    warn!("failed to delete message record: {e}");
                }
            });
        }
        self.emit_message_events(true);
    }

    /// Snapshot of the settings map.
    #[must_use]
    pub fn get_settings(&self) -> Settings {
        self.state().settings.clone()
    }

    /// Merge one settings value and persist.
    pub fn set_setting(&self, id: impl Into<String>, value: impl Into<SettingValue>) {
        self.state().settings.set(id, value);
        self.emit(WidgetEvent::SettingsChanged);
        self.persist_snapshot();
    }

    /// Re-speak the most recent bot message with content.
    pub fn speak_last(&self) {
        let last = self
            .state()
            .store
            .last_speakable()
            .and_then(|m| m.content.clone());
        if let Some(text) = last {
            self.speak_if_audible(&text);
        }
    }

    // ---- input side ---------------------------------------------------

    /// Current text-input value.
    #[must_use]
    pub fn input(&self) -> String {
        self.state().input.clone()
    }

    pub fn set_input(&self, value: impl Into<String>) {
        let value = value.into();
        self.state().input = value.clone();
        self.emit(WidgetEvent::InputChanged(value));
    }

    /// Send the current input as a user message.
    ///
    /// A no-op when the trimmed text is empty and no attachment is
    /// pending; an attachment alone is a valid send. The user message is
    /// appended optimistically, input/settings-panel/attachment are
    /// cleared, then the host callback runs — bot turns come back later
    /// through the imperative handle.
    pub async fn send(&self) {
        let outbound = {
            let mut state = self.state();
            let text = state.input.clone();
            if text.trim().is_empty() && state.attachment.is_none() {
                debug!("ignoring empty send");
                return;
            }
            let attachment = state.attachment.take();
            let is_image = attachment.is_some();
            let message = Message {
                id: None,
                sender: Sender::User,
                content: Some(text.clone()),
                image: attachment.map(|payload| vec![payload]),
                created_at: chrono::Utc::now().timestamp_millis(),
                extra: Map::new(),
            };
            state.store.append(vec![message]);
            state.input.clear();
            state.show_settings = false;
            Outbound {
                text,
                is_image,
                settings: state.settings.clone(),
            }
        };
        self.emit(WidgetEvent::InputChanged(String::new()));
        self.emit_message_events(true);
        self.inner.on_send.on_send(outbound, self.clone()).await;
    }

    /// Toggle dictation. Starting always cancels speech output first so a
    /// single tap begins listening; the reverse direction is not enforced.
    pub async fn toggle_record(&self) {
        if !self.inner.config.stt.enabled {
            return;
        }
        if !self.inner.dictation.is_recording() {
            self.inner.output.cancel();
        }
        match self.inner.dictation.toggle().await {
            DictationUpdate::Started => self.emit(WidgetEvent::RecordingChanged(true)),
            DictationUpdate::Append(transcript) => {
                let input = {
                    let mut state = self.state();
                    state.input.push_str(&transcript);
                    state.input.clone()
                };
                self.emit(WidgetEvent::RecordingChanged(false));
                self.emit(WidgetEvent::InputChanged(input));
            }
            DictationUpdate::Unchanged => {}
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.dictation.is_recording()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.state().tts_muted
    }

    /// Mute or unmute speech output; muting silences anything in flight.
    pub fn set_muted(&self, muted: bool) {
        self.state().tts_muted = muted;
        if muted {
            self.inner.output.cancel();
        }
        self.emit(WidgetEvent::MuteChanged(muted));
        self.persist_snapshot();
    }

    pub fn toggle_mute(&self) {
        let muted = self.is_muted();
        self.set_muted(!muted);
    }

    #[must_use]
    pub fn is_settings_open(&self) -> bool {
        self.state().show_settings
    }

    pub fn set_settings_open(&self, open: bool) {
        self.state().show_settings = open;
    }

    pub fn toggle_settings_panel(&self) {
        let mut state = self.state();
        state.show_settings = !state.show_settings;
    }

    /// Update one filter's selection and persist.
    pub fn set_filter(&self, id: impl Into<String>, selection: FilterSelection) {
        self.state().filter_state.insert(id.into(), selection);
        self.emit(WidgetEvent::FiltersChanged);
        self.persist_snapshot();
    }

    /// The filter specs the host UI renders selectors for.
    #[must_use]
    pub fn filter_specs(&self) -> &[FilterSpec] {
        &self.inner.filters
    }

    /// Full message log, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.state().store.messages().to_vec()
    }

    /// Messages passing every filter for every selected value.
    #[must_use]
    pub fn visible_messages(&self) -> Vec<Message> {
        let state = self.state();
        filter::visible(state.store.messages(), &self.inner.filters, &state.filter_state)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Encode an image file and stage it as the pending attachment.
    ///
    /// On failure the caller shows the error and resets its file picker;
    /// any previously staged attachment stays.
    pub async fn attach_image(&self, bytes: Vec<u8>) -> Result<()> {
        let payload =
            crate::attachment::encode_attachment(bytes, &self.inner.config.attachment).await?;
        self.state().attachment = Some(payload);
        Ok(())
    }

    /// The staged attachment, if any.
    #[must_use]
    pub fn attachment(&self) -> Option<String> {
        self.state().attachment.clone()
    }

    pub fn clear_attachment(&self) {
        self.state().attachment = None;
    }

    /// Clear the log and remove all four persisted records. In-memory
    /// settings and filter selections are left alone.
    pub async fn delete_history_all(&self) {
        if let Some(kv) = &self.inner.kv {
            for key in self.inner.keys.all() {
                if let Err(e) = kv.delete(&key).await {
                    warn!("failed to delete record {key}: {e}");
                }
            }
        }
        self.state().store.clear();
        self.emit_message_events(false);
    }

    /// Pointer-down hook: always cancels speech output (touching the UI
    /// silences speech); the first call additionally primes the
    /// microphone permission, since engines prompt only after a gesture.
    pub fn notify_pointer_down(&self) {
        self.inner.output.cancel();
        if !self.inner.gesture_seen.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.dictation.prime_microphone().await;
            });
        }
    }

    /// Whether an utterance is playing right now.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.inner.output.is_speaking()
    }

    /// Cancel speech output and stop scheduling new persistence writes.
    pub fn shutdown(&self) {
        self.inner.output.cancel();
    }

    // ---- internals ----------------------------------------------------

    fn speak_if_audible(&self, text: &str) {
        let muted = self.state().tts_muted;
        self.inner.output.speak(text, muted);
    }

    /// Message-list change fanout: renderer event, autoscroll signal
    /// (suppressed for the typing placeholder), optional persistence.
    fn emit_message_events(&self, persist: bool) {
        self.emit(WidgetEvent::MessagesChanged);
        let suppress_scroll = self
            .state()
            .store
            .messages()
            .last()
            .is_some_and(|m| m.content.as_deref() == Some(TYPING_PLACEHOLDER));
        if !suppress_scroll {
            self.emit(WidgetEvent::ScrollToEnd);
        }
        if persist {
            self.persist_snapshot();
        }
    }

    /// Fire-and-forget write of all four records. Inert until hydration
    /// completes; failures are logged and swallowed (in-memory state stays
    /// authoritative, the next session just may not see the change).
    fn persist_snapshot(&self) {
        let Some(kv) = self.inner.kv.clone() else {
            return;
        };
        let records = {
            let state = self.state();
            if !state.hydrated {
                return;
            }
            let keys = &self.inner.keys;
            [
                (keys.messages(), serde_json::to_value(state.store.messages())),
                (keys.settings(), serde_json::to_value(&state.settings)),
                (keys.tts_muted(), serde_json::to_value(state.tts_muted)),
                (keys.filters(), serde_json::to_value(&state.filter_state)),
            ]
        };
        tokio::spawn(async move {
            for (key, value) in records {
                match value {
                    Ok(value) => {
                        if let Err(e) = kv.set(&key, value).await {
                            warn!("persist write failed for {key}: {e}");
                        }
                    }
                    Err(e) => warn!("persist serialization failed for {key}: {e}"),
                }
            }
        });
    }

    /// Watch the recognition engine's listening flag. When listening ends
    /// while the bridge still thinks it is recording (engine-driven stop),
    /// the transcript *replaces* the input — unlike the manual-stop
    /// append.
    fn spawn_listening_watcher(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut listening = self.inner.dictation.engine().listening();
        tokio::spawn(async move {
            loop {
                if listening.changed().await.is_err() {
                    break;
                }
                if *listening.borrow() {
                    continue;
                }
                let Some(inner) = weak.upgrade() else { break };
                let widget = Messenger { inner };
                if let Some(transcript) = widget.inner.dictation.listening_ended() {
                    widget.state().input = transcript.clone();
                    widget.emit(WidgetEvent::RecordingChanged(false));
                    widget.emit(WidgetEvent::InputChanged(transcript));
                }
            }
        });
    }
}

async fn read_record<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Option<T> {
    match kv.get(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("ignoring malformed record {key}: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("hydration read failed for {key}: {e}");
            None
        }
    }
}
