//! Test doubles for the collaborator ports.
//!
//! The widget's external collaborators (speech engines, persistence,
//! the send callback) are injected traits, so hosts and this crate's own
//! tests share the same doubles instead of duplicating them per module.

use crate::error::{MessengerError, Result};
use crate::message::Message;
use crate::persist::KvStore;
use crate::speech::input::RecognitionEngine;
use crate::speech::output::{SpeakOutcome, SynthesisEngine, Utterance, Voice};
use crate::widget::{Messenger, Outbound, SendHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Polling interval for the `wait_for_*` helpers.
const WAIT_TICK: Duration = Duration::from_millis(5);
/// Poll cap so a broken expectation fails the test instead of hanging it.
const WAIT_LIMIT: usize = 4000;

/// Synthesis engine double that records utterances and completes them
/// immediately (or after a configurable virtual duration).
pub struct MockSynthesis {
    voices: Mutex<Vec<Voice>>,
    spoken: Mutex<Vec<Utterance>>,
    fail_budget: AtomicUsize,
    utterance_duration: Mutex<Duration>,
    cancels: AtomicUsize,
}

impl MockSynthesis {
    #[must_use]
    pub fn new(voices: Vec<Voice>) -> Self {
        Self {
            voices: Mutex::new(voices),
            spoken: Mutex::new(Vec::new()),
            fail_budget: AtomicUsize::new(0),
            utterance_duration: Mutex::new(Duration::ZERO),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Texts submitted for playback, in order.
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .expect("spoken lock")
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    /// Voice attached to the most recent utterance.
    #[must_use]
    pub fn last_voice(&self) -> Option<Voice> {
        self.spoken
            .lock()
            .expect("spoken lock")
            .last()
            .and_then(|u| u.voice.clone())
    }

    /// Make the next `n` utterances report [`SpeakOutcome::Failed`].
    pub fn fail_next(&self, n: usize) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    /// Give each utterance a (virtual) playback duration.
    pub fn set_utterance_duration(&self, duration: Duration) {
        *self.utterance_duration.lock().expect("duration lock") = duration;
    }

    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` utterances were submitted.
    pub async fn wait_for_spoken(&self, n: usize) {
        for _ in 0..WAIT_LIMIT {
            if self.spoken.lock().expect("spoken lock").len() >= n {
                return;
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
        panic!("timed out waiting for {n} spoken utterances");
    }

    /// Wait until an utterance with exactly `text` was submitted.
    pub async fn wait_for_spoken_text(&self, text: &str) {
        for _ in 0..WAIT_LIMIT {
            if self.spoken().iter().any(|t| t == text) {
                return;
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
        panic!("timed out waiting for utterance {text:?}");
    }
}

#[async_trait]
impl SynthesisEngine for MockSynthesis {
    fn voices(&self) -> Vec<Voice> {
        self.voices.lock().expect("voices lock").clone()
    }

    async fn speak(&self, utterance: Utterance) -> SpeakOutcome {
        self.spoken.lock().expect("spoken lock").push(utterance);
        let duration = *self.utterance_duration.lock().expect("duration lock");
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        let failing = self
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            SpeakOutcome::Failed
        } else {
            SpeakOutcome::Completed
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognition engine double driven by the test script.
pub struct MockRecognition {
    supported: AtomicBool,
    deny_permission: AtomicBool,
    fail_start: AtomicBool,
    permission_requests: AtomicUsize,
    transcript: Mutex<String>,
    started: Mutex<Vec<String>>,
    listening_tx: watch::Sender<bool>,
}

impl MockRecognition {
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            deny_permission: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            permission_requests: AtomicUsize::new(0),
            transcript: Mutex::new(String::new()),
            started: Mutex::new(Vec::new()),
            listening_tx: watch::Sender::new(false),
        }
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    /// Append to the transcript, as a recognition result would.
    pub fn push_transcript(&self, text: &str) {
        self.transcript.lock().expect("transcript lock").push_str(text);
    }

    /// Languages passed to `start_listening`, in order.
    #[must_use]
    pub fn started_languages(&self) -> Vec<String> {
        self.started.lock().expect("started lock").clone()
    }

    /// Simulate an engine-driven stop (user silence, engine timeout).
    pub fn end_listening(&self) {
        let _ = self.listening_tx.send(false);
    }
}

impl Default for MockRecognition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecognitionEngine for MockRecognition {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> Result<()> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(MessengerError::Recognition("permission denied".into()));
        }
        Ok(())
    }

    async fn start_listening(&self, language: &str) -> Result<()> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(MessengerError::Recognition("engine start failed".into()));
        }
        self.started
            .lock()
            .expect("started lock")
            .push(language.to_owned());
        let _ = self.listening_tx.send(true);
        Ok(())
    }

    async fn stop_listening(&self) {
        let _ = self.listening_tx.send(false);
    }

    fn transcript(&self) -> String {
        self.transcript.lock().expect("transcript lock").clone()
    }

    fn reset_transcript(&self) {
        self.transcript.lock().expect("transcript lock").clear();
    }

    fn listening(&self) -> watch::Receiver<bool> {
        self.listening_tx.subscribe()
    }
}

/// In-memory [`KvStore`]: the zero-setup backend for tests and for hosts
/// that want a hydration-free embedding.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents, for assertions.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.map.lock().expect("map lock").clone()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.map.lock().expect("map lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.map.lock().expect("map lock").insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.lock().expect("map lock").remove(key);
        Ok(())
    }
}

/// Send handler that only records what it was called with.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Outbound>>,
}

impl RecordingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Outbound> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl SendHandler for RecordingHandler {
    async fn on_send(&self, outbound: Outbound, _widget: Messenger) {
        self.calls.lock().expect("calls lock").push(outbound);
    }
}

/// Send handler that answers every user turn with fixed bot messages,
/// synchronously through the imperative handle.
pub struct RespondingHandler {
    replies: Vec<Message>,
}

impl RespondingHandler {
    #[must_use]
    pub fn new(replies: Vec<Message>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl SendHandler for RespondingHandler {
    async fn on_send(&self, _outbound: Outbound, widget: Messenger) {
        widget.add_messages(self.replies.clone());
    }
}
