//! Default event handler: sound effects and spoken announcements.
//!
//! Explicit `arguments` on an event pick the audio (`sound_effect=<file>`,
//! `announce[=<volume>]`); events without arguments get the per-kind
//! defaults. Effect and announcement run concurrently. A failed audio task
//! is logged and the event still completes, so a retry never replays a
//! sound that already played.

use cc_hooks_core::{HooksConfig, HooksPaths, StoredEvent};
use cc_hooks_protocol::HookEventKind;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::mappings::{self, Announcement, DEFAULT_VOLUME};
use crate::openrouter::OpenRouterClient;
use crate::player::AudioPlayer;
use crate::processor::EventHandler;
use crate::transcript::{self, ProcessedMarkers, MARKER_MAX_AGE, MAX_CONTEXT_CHARS};
use crate::tts::{SpeechRequest, TtsEngine};

/// Audio work requested for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPlan {
    pub effect: Option<String>,
    pub announce: Option<f32>,
}

impl AudioPlan {
    pub fn is_empty(&self) -> bool {
        self.effect.is_none() && self.announce.is_none()
    }

    pub fn task_count(&self) -> usize {
        usize::from(self.effect.is_some()) + usize::from(self.announce.is_some())
    }
}

/// Decides which audio tasks an event gets.
pub fn plan_audio(
    kind: &HookEventKind,
    arguments: Option<&Map<String, Value>>,
    config: &HooksConfig,
) -> AudioPlan {
    let mut plan = match arguments.filter(|args| !args.is_empty()) {
        Some(args) => AudioPlan {
            effect: args
                .get("sound_effect")
                .and_then(Value::as_str)
                .filter(|file| !file.is_empty())
                .map(str::to_string),
            announce: args.get("announce").and_then(announce_volume),
        },
        None => AudioPlan {
            effect: mappings::default_effect(kind).map(str::to_string),
            announce: mappings::announces_by_default(kind, config.openrouter.contextual_pretooluse)
                .then_some(config.audio.default_volume),
        },
    };

    if config.silent.effects {
        plan.effect = None;
    }
    if config.silent.announcements {
        plan.announce = None;
    }
    plan
}

/// `announce` accepts a volume number, a numeric string or a bare flag.
fn announce_volume(value: &Value) -> Option<f32> {
    let volume = match value {
        Value::Bool(false) | Value::Null => return None,
        Value::Number(number) => number.as_f64().map(|v| v as f32),
        Value::String(text) => text.trim().parse::<f32>().ok(),
        _ => None,
    };
    Some(volume.unwrap_or(DEFAULT_VOLUME).clamp(0.0, 1.0))
}

pub struct AudioHandler {
    config: HooksConfig,
    player: AudioPlayer,
    tts: TtsEngine,
    openrouter: Option<OpenRouterClient>,
    markers: ProcessedMarkers,
    sound_dir: PathBuf,
}

impl AudioHandler {
    pub fn new(config: HooksConfig, paths: &HooksPaths) -> Result<Self, reqwest::Error> {
        let tts = TtsEngine::new(&config, paths)?;
        let openrouter = OpenRouterClient::from_config(&config.openrouter);
        info!(
            providers = ?tts.chain().iter().map(|p| p.name()).collect::<Vec<_>>(),
            language = %config.audio.language,
            openrouter = openrouter.is_some(),
            silent_announcements = config.silent.announcements,
            silent_effects = config.silent.effects,
            "Audio handler ready"
        );
        Ok(Self {
            player: AudioPlayer::new(config.audio.player.clone()),
            sound_dir: config.sound_dir(paths),
            markers: ProcessedMarkers::new(paths.clone()),
            tts,
            openrouter,
            config,
        })
    }

    async fn play_effect(&self, file: &str) -> Result<(), HandlerError> {
        let path = self.sound_dir.join(file);
        if !path.is_file() {
            warn!(file = %path.display(), "Sound effect not found; skipping");
            return Ok(());
        }
        self.player.play(&path, self.config.audio.default_volume).await
    }

    async fn announce(&self, event: &StoredEvent, volume: f32) -> Result<(), HandlerError> {
        let data = event.event_data();
        let announcement = Announcement::for_event(&event.kind, &data);
        let clip = announcement.clip_name();

        let (text, clip, cacheable) = match self.contextual_text(event, &data).await {
            Some(text) => (text, None, false),
            None => match self.translated_text(&event.kind, &announcement.text, &data).await {
                Some(text) => (text, None, true),
                None => (announcement.text.clone(), clip, true),
            },
        };

        let request = SpeechRequest {
            text: &text,
            clip: clip.as_deref(),
            cacheable,
        };
        let speech = match self.tts.synthesize(&request).await {
            Ok(speech) => speech,
            Err(err) => {
                warn!(kind = %event.kind, error = %err, "No audio available for announcement");
                return Ok(());
            }
        };
        info!(kind = %event.kind, text = %text, "Announcing");
        let played = self.player.play(&speech.path, volume).await;
        speech.discard().await;
        played
    }

    /// OpenRouter-generated text for Stop and PreToolUse, when enabled.
    async fn contextual_text(&self, event: &StoredEvent, data: &Value) -> Option<String> {
        let client = self.openrouter.as_ref()?;
        let wants = match event.kind {
            HookEventKind::Stop => client.contextual_stop(),
            HookEventKind::PreToolUse => client.contextual_pretooluse(),
            _ => false,
        };
        if !wants {
            return None;
        }

        let context = match data.get("transcript_path").and_then(Value::as_str) {
            Some(path) => {
                let path = PathBuf::from(path);
                let markers = self.markers.clone();
                let session_id = event.session_id.clone();
                tokio::task::spawn_blocking(move || {
                    markers.filter(&session_id, transcript::extract_context(&path, MAX_CONTEXT_CHARS))
                })
                .await
                .unwrap_or_default()
            }
            None => Default::default(),
        };

        let language = &self.config.audio.language;
        match event.kind {
            HookEventKind::Stop if context.has_context() => {
                client.completion_message(&context, language).await
            }
            HookEventKind::PreToolUse => {
                let tool = data.get("tool_name").and_then(Value::as_str).unwrap_or("tool");
                client.pre_tool_message(tool, &context, language).await
            }
            _ => None,
        }
    }

    /// Resets reply tracking at the end of a turn or session.
    async fn finish_turn(&self, event: &StoredEvent) {
        let session_end = match event.kind {
            HookEventKind::Stop => false,
            HookEventKind::SessionEnd => true,
            _ => return,
        };
        let markers = self.markers.clone();
        let session_id = event.session_id.clone();
        let cleanup = tokio::task::spawn_blocking(move || {
            markers.clear(&session_id);
            if session_end {
                let removed = markers.remove_older_than(MARKER_MAX_AGE);
                debug!(removed, "Removed old processed markers");
            }
        });
        if let Err(err) = cleanup.await {
            warn!(event_id = event.id, error = %err, "Processed marker cleanup did not finish");
        }
    }

    async fn translated_text(&self, kind: &HookEventKind, text: &str, data: &Value) -> Option<String> {
        let language = self.config.audio.language.as_str();
        if language.eq_ignore_ascii_case("en") {
            return None;
        }
        let client = self.openrouter.as_ref()?;
        client.translate(text, language, kind, data).await
    }
}

impl EventHandler for AudioHandler {
    async fn handle(&self, event: &StoredEvent) -> Result<(), HandlerError> {
        let plan = plan_audio(&event.kind, event.arguments.as_ref(), &self.config);
        let total = plan.task_count();

        if !plan.is_empty() {
            debug!(event_id = event.id, plan = ?plan, "Running audio tasks");
            let effect = async {
                match &plan.effect {
                    Some(file) => self.play_effect(file).await,
                    None => Ok(()),
                }
            };
            let announce = async {
                match plan.announce {
                    Some(volume) => self.announce(event, volume).await,
                    None => Ok(()),
                }
            };
            let (effect, announce) = tokio::join!(effect, announce);

            let mut failed = 0;
            for (task, result) in [("effect", effect), ("announce", announce)] {
                if let Err(err) = result {
                    failed += 1;
                    warn!(event_id = event.id, task, error = %err, "Audio task failed");
                }
            }
            if failed > 0 {
                warn!(event_id = event.id, failed, total, "Some audio tasks failed");
            }
        }

        self.finish_turn(event).await;
        log_event(event);
        Ok(())
    }
}

fn log_event(event: &StoredEvent) {
    let data = &event.payload;
    let session = event.session_id.as_str();
    let field = |name: &str| data.get(name).and_then(Value::as_str).unwrap_or("").to_string();
    match &event.kind {
        HookEventKind::SessionStart => info!(session, source = %field("source"), "Session started"),
        HookEventKind::SessionEnd => info!(session, reason = %field("reason"), "Session ended"),
        HookEventKind::PreToolUse => info!(session, tool = %field("tool_name"), "Pre-tool use"),
        HookEventKind::PostToolUse => info!(session, tool = %field("tool_name"), "Post-tool use"),
        HookEventKind::Notification => info!(session, message = %field("message"), "Notification"),
        HookEventKind::UserPromptSubmit => info!(session, "User submitted prompt"),
        HookEventKind::Stop => info!(session, "Stop"),
        HookEventKind::SubagentStop => info!(session, "Subagent stopped"),
        HookEventKind::PreCompact => info!(session, trigger = %field("trigger"), "Pre-compact"),
        HookEventKind::Unknown(name) => {
            info!(session, kind = %name, "Skipping kind-specific handling for unknown event")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Processor, ProcessorOptions};
    use cc_hooks_core::{Db, NewEvent};
    use cc_hooks_protocol::{EventStatus, InstanceId};
    use chrono::Utc;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tokio_util::sync::CancellationToken;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn explicit_arguments_replace_defaults() {
        let config = HooksConfig::default();
        let arguments = args(json!({"sound_effect": "sound_effect_klek.mp3", "announce": 0.8}));
        let plan = plan_audio(&HookEventKind::Stop, Some(&arguments), &config);
        assert_eq!(plan.effect.as_deref(), Some("sound_effect_klek.mp3"));
        assert_eq!(plan.announce, Some(0.8));

        let arguments = args(json!({"announce": true}));
        let plan = plan_audio(&HookEventKind::PreToolUse, Some(&arguments), &config);
        assert_eq!(plan.effect, None);
        assert_eq!(plan.announce, Some(DEFAULT_VOLUME));
    }

    #[test]
    fn announce_volume_forms() {
        assert_eq!(announce_volume(&json!(true)), Some(0.5));
        assert_eq!(announce_volume(&json!("0.25")), Some(0.25));
        assert_eq!(announce_volume(&json!(3)), Some(1.0));
        assert_eq!(announce_volume(&json!(false)), None);
        assert_eq!(announce_volume(&json!("loud")), Some(0.5));
    }

    #[test]
    fn defaults_apply_without_arguments() {
        let config = HooksConfig::default();
        let plan = plan_audio(&HookEventKind::PreToolUse, None, &config);
        assert_eq!(plan.effect.as_deref(), Some("sound_effect_tek.mp3"));
        assert_eq!(plan.announce, None);

        let plan = plan_audio(&HookEventKind::SessionStart, Some(&Map::new()), &config);
        assert_eq!(plan.effect, None);
        assert_eq!(plan.announce, Some(config.audio.default_volume));

        let plan = plan_audio(&HookEventKind::Unknown("Custom".to_string()), None, &config);
        assert!(plan.is_empty());
    }

    #[test]
    fn silent_flags_suppress_tasks() {
        let mut config = HooksConfig::default();
        config.silent.effects = true;
        config.silent.announcements = true;
        let arguments = args(json!({"sound_effect": "x.mp3", "announce": true}));
        assert!(plan_audio(&HookEventKind::Stop, Some(&arguments), &config).is_empty());
    }

    fn stored(kind: HookEventKind, arguments: Option<Map<String, Value>>) -> StoredEvent {
        StoredEvent {
            id: 1,
            session_id: "s1".to_string(),
            kind: kind.clone(),
            payload: json!({"hook_event_name": kind.as_str(), "session_id": "s1"}),
            arguments,
            status: EventStatus::Processing,
            instance_id: Some("1:12222".to_string()),
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            processed_at: None,
            retry_count: 0,
            error_message: None,
        }
    }

    fn handler(dir: &Path, player: &str) -> AudioHandler {
        let paths = HooksPaths::new(dir);
        let mut config = HooksConfig::default();
        config.audio.player = Some(player.to_string());
        config.audio.providers = "prerecorded".to_string();
        AudioHandler::new(config, &paths).expect("handler")
    }

    #[tokio::test]
    async fn missing_audio_files_are_not_failures() {
        let dir = tempfile::tempdir().expect("temp dir");
        let handler = handler(dir.path(), "false");
        let arguments = args(json!({"sound_effect": "nope.mp3", "announce": true}));
        handler
            .handle(&stored(HookEventKind::Stop, Some(arguments)))
            .await
            .expect("handled");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn player_failure_still_completes_the_event() {
        let dir = tempfile::tempdir().expect("temp dir");
        let handler = handler(dir.path(), "false");
        fs_err::create_dir_all(&handler.sound_dir).expect("mkdir");
        fs_err::write(handler.sound_dir.join("stop_task_completed.mp3"), b"ID3").expect("clip");
        fs_err::write(handler.sound_dir.join("sound_effect_klek.mp3"), b"ID3").expect("effect");

        let arguments = args(json!({"sound_effect": "sound_effect_klek.mp3", "announce": true}));
        handler
            .handle(&stored(HookEventKind::Stop, Some(arguments)))
            .await
            .expect("audio failures are not event failures");
    }

    /// Player that records every file it is asked to play and fails on the
    /// Stop announcement clip.
    #[cfg(unix)]
    fn logging_player(dir: &Path) -> (String, PathBuf) {
        let log = dir.join("played.log");
        let script = dir.join("player.sh");
        fs_err::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1\" >> {}\ncase \"$1\" in *stop_task_*) exit 1 ;; esac\n",
                log.display()
            ),
        )
        .expect("player script");
        (format!("sh {}", script.display()), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_announcement_does_not_replay_effect() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (player, log) = logging_player(dir.path());
        let handler = handler(dir.path(), &player);
        fs_err::create_dir_all(&handler.sound_dir).expect("mkdir");
        fs_err::write(handler.sound_dir.join("stop_task_completed.mp3"), b"ID3").expect("clip");
        fs_err::write(handler.sound_dir.join("sound_effect_klek.mp3"), b"ID3").expect("effect");

        let db = Db::new(HooksPaths::new(dir.path()).db_path()).expect("db init");
        let owner = InstanceId::new(100, 12222);
        let id = db
            .enqueue(&NewEvent {
                session_id: "s1".to_string(),
                kind: HookEventKind::Stop,
                payload: json!({"session_id": "s1", "hook_event_name": "Stop"}),
                arguments: Some(args(
                    json!({"sound_effect": "sound_effect_klek.mp3", "announce": true}),
                )),
                owner,
            })
            .expect("enqueue");

        let cancel = CancellationToken::new();
        let processor = Processor::new(
            db.clone(),
            owner,
            Utc::now() - chrono::Duration::seconds(1),
            Arc::new(handler),
            ProcessorOptions {
                poll_interval: Duration::from_millis(5),
                error_wait: Duration::from_millis(5),
                max_retries: 3,
            },
        );
        let task = tokio::spawn(processor.run(cancel.clone()));

        let mut stored = None;
        for _ in 0..400 {
            let event = db.get_event(id).expect("get").expect("event");
            if matches!(event.status, EventStatus::Completed | EventStatus::Failed) {
                stored = Some(event);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Give the loop time to show it does not pick the event up again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.expect("join");

        let stored = stored.expect("event finished");
        assert_eq!(stored.status, EventStatus::Completed);
        assert_eq!(stored.retry_count, 0);

        let played = fs_err::read_to_string(&log).expect("player log");
        let plays = |name: &str| played.lines().filter(|line| line.contains(name)).count();
        assert_eq!(plays("sound_effect_klek.mp3"), 1);
        assert_eq!(plays("stop_task_completed.mp3"), 1);
    }

    #[tokio::test]
    async fn stop_and_session_end_reset_reply_tracking() {
        let dir = tempfile::tempdir().expect("temp dir");
        let handler = handler(dir.path(), "true");
        let paths = HooksPaths::new(dir.path());
        fs_err::create_dir_all(paths.processed_dir()).expect("mkdir");
        fs_err::write(paths.processed_marker("s1"), "abc").expect("marker");
        fs_err::write(paths.processed_marker("old"), "def").expect("old marker");
        std::fs::OpenOptions::new()
            .write(true)
            .open(paths.processed_marker("old"))
            .expect("open marker")
            .set_modified(SystemTime::now() - Duration::from_secs(48 * 60 * 60))
            .expect("backdate marker");

        let silent = || Some(args(json!({"announce": false})));
        handler
            .handle(&stored(HookEventKind::Stop, silent()))
            .await
            .expect("stop");
        assert!(!paths.processed_marker("s1").exists());
        assert!(paths.processed_marker("old").exists());

        handler
            .handle(&stored(HookEventKind::SessionEnd, silent()))
            .await
            .expect("session end");
        assert!(!paths.processed_marker("old").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_playback_completes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let handler = handler(dir.path(), "true");
        fs_err::create_dir_all(&handler.sound_dir).expect("mkdir");
        fs_err::write(handler.sound_dir.join("session_start_resume.mp3"), b"ID3").expect("clip");

        let mut event = stored(HookEventKind::SessionStart, None);
        event.payload = json!({"source": "resume"});
        handler.handle(&event).await.expect("handled");
    }

    #[tokio::test]
    async fn unknown_kinds_are_accepted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let handler = handler(dir.path(), "false");
        handler
            .handle(&stored(HookEventKind::Unknown("Custom".to_string()), None))
            .await
            .expect("handled");
    }
}
