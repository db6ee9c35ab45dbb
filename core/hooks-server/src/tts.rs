//! Text-to-speech provider chain.
//!
//! Providers are tried in configured order until one yields an audio file:
//!
//! | provider      | source                                   | cache key                          |
//! |---------------|------------------------------------------|------------------------------------|
//! | `prerecorded` | `<sound dir>/<key>.mp3`                  | n/a                                |
//! | `gtts`        | Google Translate speech endpoint         | `md5(text_lang)`                   |
//! | `elevenlabs`  | ElevenLabs text-to-speech API            | `md5(text_voice_model_lang)`       |
//! | `kokoro`      | OpenAI-compatible `/audio/speech` server | `md5(text_voice_model)`            |
//!
//! Cached files live in `.tts_cache/<provider>/`. Uncached output goes to
//! `tmp/` and is deleted once it has been played.

use cc_hooks_core::config::{ElevenLabsConfig, HooksConfig, KokoroConfig};
use cc_hooks_core::HooksPaths;
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::TtsError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const GTTS_URL: &str = "https://translate.google.com/translate_tts";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtsProvider {
    Prerecorded,
    Gtts,
    ElevenLabs,
    Kokoro,
}

impl TtsProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "prerecorded" => Some(Self::Prerecorded),
            "gtts" => Some(Self::Gtts),
            "elevenlabs" => Some(Self::ElevenLabs),
            "kokoro" => Some(Self::Kokoro),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Prerecorded => "prerecorded",
            Self::Gtts => "gtts",
            Self::ElevenLabs => "elevenlabs",
            Self::Kokoro => "kokoro",
        }
    }

    /// Produces an audio file for `request` or explains why it could not.
    pub async fn attempt(
        self,
        request: &SpeechRequest<'_>,
        context: &TtsContext,
    ) -> Result<Speech, TtsError> {
        match self {
            Self::Prerecorded => context.prerecorded(request).map(Speech::kept),
            Self::Gtts => context.gtts(request).await,
            Self::ElevenLabs => context.elevenlabs(request).await,
            Self::Kokoro => context.kokoro(request).await,
        }
    }
}

/// Parses a comma-separated provider list. Unknown names are skipped,
/// duplicates dropped, and an empty result falls back to `prerecorded`.
pub fn parse_chain(providers: &str) -> Vec<TtsProvider> {
    let mut chain = Vec::new();
    for name in providers.split(',').map(|n| n.trim().to_lowercase()) {
        if name.is_empty() {
            continue;
        }
        match TtsProvider::parse(&name) {
            Some(provider) if !chain.contains(&provider) => chain.push(provider),
            Some(_) => {}
            None => warn!(provider = %name, "Unknown TTS provider; skipping"),
        }
    }
    if chain.is_empty() {
        chain.push(TtsProvider::Prerecorded);
    }
    chain
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    /// Prerecorded clip matching `text`, when the text is the untouched
    /// static description.
    pub clip: Option<&'a str>,
    pub cacheable: bool,
}

/// Audio produced for one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speech {
    pub path: PathBuf,
    /// One-off output in `tmp/` that nobody else will reuse.
    pub temporary: bool,
}

impl Speech {
    fn kept(path: PathBuf) -> Self {
        Self {
            path,
            temporary: false,
        }
    }

    /// Deletes one-off output after playback; shared files are left alone.
    pub async fn discard(self) {
        if !self.temporary {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(file = %self.path.display(), "Removed played speech"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(file = %self.path.display(), error = %err, "Failed to remove played speech"),
        }
    }
}

/// Everything providers need besides the request.
pub struct TtsContext {
    client: Client,
    language: String,
    cache_enabled: bool,
    sound_dir: PathBuf,
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
    elevenlabs: ElevenLabsConfig,
    kokoro: KokoroConfig,
}

impl TtsContext {
    pub fn new(config: &HooksConfig, paths: &HooksPaths) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            language: config.audio.language.clone(),
            cache_enabled: config.audio.cache_enabled,
            sound_dir: config.sound_dir(paths),
            cache_dir: paths.cache_dir(),
            tmp_dir: paths.tmp_dir(),
            elevenlabs: config.elevenlabs.clone(),
            kokoro: config.kokoro.clone(),
        })
    }

    fn prerecorded(&self, request: &SpeechRequest<'_>) -> Result<PathBuf, TtsError> {
        let clip = request.clip.ok_or_else(|| TtsError::Unavailable {
            provider: "prerecorded",
            reason: "no clip for this text".to_string(),
        })?;
        let path = self.sound_dir.join(clip);
        if path.is_file() {
            Ok(path)
        } else {
            Err(TtsError::MissingSound(path))
        }
    }

    async fn gtts(&self, request: &SpeechRequest<'_>) -> Result<Speech, TtsError> {
        const PROVIDER: &str = "gtts";
        let key = cache_key(&[request.text, self.language.as_str()]);
        if let Some(hit) = self.cached(PROVIDER, &key, request).await {
            return Ok(Speech::kept(hit));
        }
        let response = self
            .client
            .get(GTTS_URL)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.language.as_str()),
                ("q", request.text),
            ])
            .send()
            .await
            .map_err(|source| TtsError::Request {
                provider: PROVIDER,
                source,
            })?;
        self.store(PROVIDER, &key, request, response).await
    }

    async fn elevenlabs(&self, request: &SpeechRequest<'_>) -> Result<Speech, TtsError> {
        const PROVIDER: &str = "elevenlabs";
        let api_key = self
            .elevenlabs
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| TtsError::Unavailable {
                provider: PROVIDER,
                reason: "ELEVENLABS_API_KEY is not set".to_string(),
            })?;
        let key = cache_key(&[
            request.text,
            self.elevenlabs.voice_id.as_str(),
            self.elevenlabs.model_id.as_str(),
            self.language.as_str(),
        ]);
        if let Some(hit) = self.cached(PROVIDER, &key, request).await {
            return Ok(Speech::kept(hit));
        }
        let response = self
            .client
            .post(format!("{}/{}", ELEVENLABS_URL, self.elevenlabs.voice_id))
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": request.text,
                "model_id": self.elevenlabs.model_id,
            }))
            .send()
            .await
            .map_err(|source| TtsError::Request {
                provider: PROVIDER,
                source,
            })?;
        self.store(PROVIDER, &key, request, response).await
    }

    async fn kokoro(&self, request: &SpeechRequest<'_>) -> Result<Speech, TtsError> {
        const PROVIDER: &str = "kokoro";
        let key = cache_key(&[request.text, self.kokoro.voice.as_str(), self.kokoro.model.as_str()]);
        if let Some(hit) = self.cached(PROVIDER, &key, request).await {
            return Ok(Speech::kept(hit));
        }
        let response = self
            .client
            .post(format!("{}/audio/speech", self.kokoro.base_url.trim_end_matches('/')))
            .json(&json!({
                "model": self.kokoro.model,
                "input": request.text,
                "voice": self.kokoro.voice,
                "response_format": "mp3",
            }))
            .send()
            .await
            .map_err(|source| TtsError::Request {
                provider: PROVIDER,
                source,
            })?;
        self.store(PROVIDER, &key, request, response).await
    }

    fn caching(&self, request: &SpeechRequest<'_>) -> bool {
        self.cache_enabled && request.cacheable
    }

    fn cache_path(&self, provider: &str, key: &str) -> PathBuf {
        self.cache_dir.join(provider).join(format!("{}.mp3", key))
    }

    /// Returns a usable cache hit; empty cache files are removed.
    async fn cached(&self, provider: &str, key: &str, request: &SpeechRequest<'_>) -> Option<PathBuf> {
        if !self.caching(request) {
            return None;
        }
        let path = self.cache_path(provider, key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(provider, file = %path.display(), "TTS cache hit");
                Some(path)
            }
            Ok(_) => {
                warn!(provider, file = %path.display(), "Removing empty cache file");
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
            Err(_) => None,
        }
    }

    async fn store(
        &self,
        provider: &'static str,
        key: &str,
        request: &SpeechRequest<'_>,
        response: reqwest::Response,
    ) -> Result<Speech, TtsError> {
        if !response.status().is_success() {
            return Err(TtsError::Status {
                provider,
                status: response.status().as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| TtsError::Request { provider, source })?;
        if bytes.is_empty() {
            return Err(TtsError::EmptyAudio { provider });
        }

        let temporary = !self.caching(request);
        let path = if !temporary {
            self.cache_path(provider, key)
        } else {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            self.tmp_dir.join(format!("{}-{}-{}.mp3", provider, key, nanos))
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| TtsError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| TtsError::Io {
                path: path.clone(),
                source,
            })?;
        info!(provider, file = %path.display(), bytes = bytes.len(), "Synthesized speech");
        Ok(Speech { path, temporary })
    }
}

fn cache_key(parts: &[&str]) -> String {
    format!("{:x}", md5::compute(parts.join("_")))
}

/// Ordered provider chain plus the shared provider context.
pub struct TtsEngine {
    chain: Vec<TtsProvider>,
    context: TtsContext,
}

impl TtsEngine {
    pub fn new(config: &HooksConfig, paths: &HooksPaths) -> Result<Self, reqwest::Error> {
        Ok(Self {
            chain: parse_chain(&config.audio.providers),
            context: TtsContext::new(config, paths)?,
        })
    }

    pub fn chain(&self) -> &[TtsProvider] {
        &self.chain
    }

    /// First audio file any provider in the chain can produce.
    pub async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<Speech, TtsError> {
        let mut last_error = None;
        for provider in &self.chain {
            match provider.attempt(request, &self.context).await {
                Ok(speech) => {
                    debug!(provider = provider.name(), "TTS provider succeeded");
                    return Ok(speech);
                }
                Err(err) => {
                    debug!(provider = provider.name(), error = %err, "TTS provider failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(TtsError::Unavailable {
            provider: "tts",
            reason: "no providers configured".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::path::Path;

    #[test]
    fn chain_is_normalized() {
        assert_eq!(
            parse_chain(" Kokoro, gtts ,kokoro,bogus,prerecorded"),
            vec![TtsProvider::Kokoro, TtsProvider::Gtts, TtsProvider::Prerecorded]
        );
        assert_eq!(parse_chain(""), vec![TtsProvider::Prerecorded]);
        assert_eq!(parse_chain("bogus"), vec![TtsProvider::Prerecorded]);
    }

    #[test]
    fn cache_key_is_md5_of_joined_parts() {
        assert_eq!(
            cache_key(&["hello", "en"]),
            format!("{:x}", md5::compute("hello_en"))
        );
    }

    fn engine(dir: &Path, providers: &str, kokoro_base: Option<String>) -> TtsEngine {
        let paths = HooksPaths::new(dir);
        let mut config = HooksConfig::default();
        config.audio.providers = providers.to_string();
        config.elevenlabs.api_key = None;
        if let Some(base) = kokoro_base {
            config.kokoro.base_url = base;
        }
        TtsEngine::new(&config, &paths).expect("engine")
    }

    #[tokio::test]
    async fn prerecorded_needs_clip_on_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let engine = engine(dir.path(), "prerecorded", None);
        let request = SpeechRequest {
            text: "Task completed successfully",
            clip: Some("stop_task_completed.mp3"),
            cacheable: true,
        };

        assert!(matches!(
            engine.synthesize(&request).await,
            Err(TtsError::MissingSound(_))
        ));

        fs_err::create_dir_all(&engine.context.sound_dir).expect("mkdir");
        let clip = engine.context.sound_dir.join("stop_task_completed.mp3");
        fs_err::write(&clip, b"ID3").expect("write clip");
        let speech = engine.synthesize(&request).await.expect("clip");
        assert_eq!(speech.path, clip);
        assert!(!speech.temporary);

        speech.discard().await;
        assert!(clip.exists());
    }

    #[tokio::test]
    async fn elevenlabs_without_key_falls_through() {
        let dir = tempfile::tempdir().expect("temp dir");
        let engine = engine(dir.path(), "elevenlabs", None);
        let request = SpeechRequest {
            text: "Ready",
            clip: None,
            cacheable: true,
        };
        assert!(matches!(
            engine.synthesize(&request).await,
            Err(TtsError::Unavailable {
                provider: "elevenlabs",
                ..
            })
        ));
    }

    async fn kokoro_server(hits: Arc<AtomicUsize>) -> String {
        let router = Router::new().route(
            "/v1/audio/speech",
            post(move |Json(body): Json<serde_json::Value>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(body["response_format"], "mp3");
                    assert_eq!(body["voice"], "af_sky");
                    vec![0x49u8, 0x44, 0x33]
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{}/v1", addr)
    }

    #[tokio::test]
    async fn kokoro_output_is_cached_between_calls() {
        let dir = tempfile::tempdir().expect("temp dir");
        let hits = Arc::new(AtomicUsize::new(0));
        let base = kokoro_server(Arc::clone(&hits)).await;
        let engine = engine(dir.path(), "prerecorded,kokoro", Some(base));
        let request = SpeechRequest {
            text: "Session resume",
            clip: Some("session_start_resume.mp3"),
            cacheable: true,
        };

        let first = engine.synthesize(&request).await.expect("first");
        let second = engine.synthesize(&request).await.expect("second");
        assert_eq!(first, second);
        assert!(first.path.starts_with(dir.path().join(".tts_cache").join("kokoro")));
        assert!(!first.temporary);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let cached = first.path.clone();
        first.discard().await;
        assert!(cached.exists());
    }

    #[tokio::test]
    async fn uncacheable_output_is_removed_after_use() {
        let dir = tempfile::tempdir().expect("temp dir");
        let hits = Arc::new(AtomicUsize::new(0));
        let base = kokoro_server(Arc::clone(&hits)).await;
        let engine = engine(dir.path(), "kokoro", Some(base));
        let request = SpeechRequest {
            text: "Fixed the flaky test",
            clip: None,
            cacheable: false,
        };

        let first = engine.synthesize(&request).await.expect("first");
        let second = engine.synthesize(&request).await.expect("second");
        assert!(first.path.starts_with(dir.path().join("tmp")));
        assert!(first.temporary);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let (first_path, second_path) = (first.path.clone(), second.path.clone());
        assert!(first_path.exists());
        first.discard().await;
        second.discard().await;
        assert!(!first_path.exists());
        assert!(!second_path.exists());
    }
}
