//! End-to-end widget scenarios: send/receive, speech gating, dictation
//! transcript merging, and persistence round trips across both backends.

use anyhow::Result;
use palaver::testing::{MemoryStore, MockRecognition, MockSynthesis, RespondingHandler};
use palaver::{
    Collaborators, FilterSelection, FilterSpec, KvStore, Message, MessagePatch, MessengerConfig,
    Messenger, SelectOption, Sender, SettingField, SettingValue, SqliteStore, TtsConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palaver=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn voice() -> palaver::speech::output::Voice {
    palaver::speech::output::Voice {
        name: "Katja".into(),
        language: "de-DE".into(),
        uri: "urn:voice:katja".into(),
    }
}

struct Harness {
    synthesis: Arc<MockSynthesis>,
    recognition: Arc<MockRecognition>,
}

impl Harness {
    fn new() -> Self {
        Self {
            synthesis: Arc::new(MockSynthesis::new(vec![voice()])),
            recognition: Arc::new(MockRecognition::new()),
        }
    }

    fn collaborators(
        &self,
        on_send: Arc<dyn palaver::SendHandler>,
        kv: Option<Arc<dyn KvStore>>,
        filters: Vec<FilterSpec>,
    ) -> Collaborators {
        Collaborators {
            on_send,
            synthesis: self.synthesis.clone(),
            recognition: self.recognition.clone(),
            kv,
            filters,
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..4000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never became true");
}

#[tokio::test(start_paused = true)]
async fn send_receive_round_trip_speaks_exactly_once() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![Message::bot("Hello")]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    widget.set_input("Hi");
    widget.send().await;

    let log = widget.messages();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].sender, Sender::User);
    assert_eq!(log[0].content.as_deref(), Some("Hi"));
    assert_eq!(log[1].sender, Sender::Bot);
    assert_eq!(log[1].content.as_deref(), Some("Hello"));

    harness.synthesis.wait_for_spoken(1).await;
    // Give the queue time to (incorrectly) produce more utterances.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.synthesis.spoken(), vec!["Hello"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn muted_widget_never_invokes_the_engine() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let config = MessengerConfig {
        tts: TtsConfig {
            default_on: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let (widget, _rx) = Messenger::mount(config, collab).await;
    assert!(widget.is_muted());

    widget.add_messages(vec![Message::bot("You should not hear this")]);
    widget.speak_last();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(harness.synthesis.spoken().is_empty());
    Ok(())
}

#[tokio::test]
async fn manual_stop_appends_and_engine_stop_replaces() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    // Manual stop on an empty input appends the transcript.
    widget.toggle_record().await;
    assert!(widget.is_recording());
    harness.recognition.push_transcript("test");
    widget.toggle_record().await;
    assert_eq!(widget.input(), "test");

    // Engine-driven stop replaces whatever the input held.
    widget.set_input("keep");
    widget.toggle_record().await;
    harness.recognition.push_transcript("auto");
    harness.recognition.end_listening();
    wait_until(|| widget.input() == "auto").await;
    assert_eq!(widget.input(), "auto");
    assert!(!widget.is_recording());
    Ok(())
}

#[tokio::test]
async fn starting_dictation_cancels_speech_output() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    let before = harness.synthesis.cancel_count();
    widget.toggle_record().await;
    assert!(harness.synthesis.cancel_count() > before);
    Ok(())
}

fn sender_filter() -> FilterSpec {
    FilterSpec::new(
        "sender",
        "Sender",
        vec![
            SelectOption::new("User", "user"),
            SelectOption::new("Bot", "bot"),
        ],
        false,
        |m: &Message, value: &str| match value {
            "user" => m.sender == Sender::User,
            "bot" => m.sender == Sender::Bot,
            _ => false,
        },
    )
}

async fn seed_records(kv: &dyn KvStore, prefix: &str) -> Result<()> {
    kv.set(
        &format!("{prefix}:messages"),
        json!([
            {"type": "bot", "content": "restored", "createdAt": 1},
            {"type": "user", "content": "mine", "createdAt": 2}
        ]),
    )
    .await?;
    kv.set(&format!("{prefix}:settings"), json!({"steps": 7}))
        .await?;
    kv.set(&format!("{prefix}:ttsMuted"), json!(true)).await?;
    kv.set(&format!("{prefix}:filters"), json!({"sender": "bot"}))
        .await?;
    Ok(())
}

async fn assert_hydrates_from(kv: Arc<dyn KvStore>) -> Result<()> {
    seed_records(kv.as_ref(), "messenger").await?;

    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, Some(kv), vec![sender_filter()]);
    let config = MessengerConfig {
        initial_messages: vec![Message::bot("should not be used")],
        settings_schema: vec![SettingField::Number {
            id: "steps".into(),
            label: "Steps".into(),
            min: None,
            max: None,
            step: None,
            default_value: Some(50.0),
        }],
        ..Default::default()
    };
    let (widget, _rx) = Messenger::mount(config, collab).await;

    assert!(widget.is_ready());
    let log = widget.messages();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].content.as_deref(), Some("restored"));
    // Hydration overwrites the schema-seeded settings wholesale.
    assert_eq!(
        widget.get_settings().get("steps"),
        Some(&SettingValue::Number(7.0))
    );
    assert!(widget.is_muted());
    // The persisted filter selection narrows the visible subset.
    let visible = widget.visible_messages();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].sender, Sender::Bot);
    Ok(())
}

#[tokio::test]
async fn hydration_restores_all_four_records_from_the_string_store() -> Result<()> {
    init_logs();
    let dir = tempfile::tempdir()?;
    let kv = Arc::new(palaver::JsonFileStore::new(dir.path().join("kv.json"))?);
    assert_hydrates_from(kv).await
}

#[tokio::test]
async fn hydration_restores_all_four_records_from_the_document_store() -> Result<()> {
    init_logs();
    let kv = Arc::new(SqliteStore::in_memory()?);
    assert_hydrates_from(kv).await
}

#[tokio::test]
async fn mutations_persist_and_survive_a_remount() -> Result<()> {
    init_logs();
    let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());

    {
        let harness = Harness::new();
        let responder = Arc::new(RespondingHandler::new(vec![]));
        let collab = harness.collaborators(responder, Some(kv.clone()), vec![sender_filter()]);
        let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

        widget.add_messages(vec![Message::bot("persisted turn").with_id("b1")]);
        widget.set_setting("style", "photo");
        widget.set_muted(true);
        widget.set_filter("sender", FilterSelection::One(Some("bot".into())));
        wait_until(|| kv.snapshot().len() == 4).await;
        wait_until(|| {
            let snapshot = kv.snapshot();
            snapshot.get("messenger:ttsMuted") == Some(&json!(true))
                && snapshot.get("messenger:filters") == Some(&json!({"sender": "bot"}))
        })
        .await;
    }

    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, Some(kv), vec![sender_filter()]);
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    let log = widget.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id.as_deref(), Some("b1"));
    assert_eq!(
        widget.get_settings().get("style"),
        Some(&SettingValue::Text("photo".into()))
    );
    assert!(widget.is_muted());
    assert_eq!(widget.visible_messages().len(), 1);
    Ok(())
}

#[tokio::test]
async fn initial_messages_seed_only_without_persisted_data() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, Some(Arc::new(MemoryStore::new())), Vec::new());
    let config = MessengerConfig {
        initial_messages: vec![Message::bot("welcome").with_id("seed")],
        ..Default::default()
    };
    let (widget, _rx) = Messenger::mount(config, collab).await;
    let log = widget.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id.as_deref(), Some("seed"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn streamed_patches_keep_one_message_and_speak_updates() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    widget.update_message("s1", &MessagePatch::default());
    widget.update_message("s1", &MessagePatch::content("Partial"));
    widget.update_message("s1", &MessagePatch::content("Partial answer."));

    let log = widget.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].content.as_deref(), Some("Partial answer."));
    assert_eq!(log[0].sender, Sender::Bot);

    harness.synthesis.wait_for_spoken_text("Partial answer.").await;
    Ok(())
}

#[tokio::test]
async fn removing_a_message_by_identity_key() -> Result<()> {
    init_logs();
    let harness = Harness::new();
    let responder = Arc::new(RespondingHandler::new(vec![]));
    let collab = harness.collaborators(responder, None, Vec::new());
    let (widget, _rx) = Messenger::mount(MessengerConfig::default(), collab).await;

    widget.add_messages(vec![Message::bot("keep").with_id("a"), Message::bot("drop")]);
    let key = widget.messages()[1].identity();
    widget.remove_message(&key);
    let log = widget.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id.as_deref(), Some("a"));
    Ok(())
}
