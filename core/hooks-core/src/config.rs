//! Configuration loading.
//!
//! Resolution order, last wins:
//! 1. built-in defaults
//! 2. `config.toml` in the data directory
//! 3. environment variables
//! 4. per-session overrides passed to the server at launch
//!
//! The resolved `HooksConfig` is built once at server startup and handed to
//! the processor and handlers explicitly.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{HooksError, Result};
use crate::paths::HooksPaths;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub silent: SilentConfig,
    pub openrouter: OpenRouterConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub kokoro: KokoroConfig,
    pub launcher: LauncherConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub db_path: Option<PathBuf>,
    pub max_retry_count: u32,
    pub poll_interval_ms: u64,
    pub error_wait_ms: u64,
    pub owner_check_interval_ms: u64,
    /// Path to the `cc-hooks-server` binary; defaults to a sibling of the
    /// running executable.
    pub server_bin: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: cc_hooks_protocol::DEFAULT_HOST.to_string(),
            db_path: None,
            max_retry_count: 3,
            poll_interval_ms: 100,
            error_wait_ms: 5_000,
            owner_check_interval_ms: 5_000,
            server_bin: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Comma separated provider chain, tried in order.
    pub providers: String,
    pub language: String,
    pub cache_enabled: bool,
    /// External player command; platform default when unset.
    pub player: Option<String>,
    pub sound_dir: Option<PathBuf>,
    pub default_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            providers: "prerecorded".to_string(),
            language: "en".to_string(),
            cache_enabled: true,
            player: None,
            sound_dir: None,
            default_volume: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SilentConfig {
    pub announcements: bool,
    pub effects: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub contextual_stop: bool,
    pub contextual_pretooluse: bool,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            contextual_stop: false,
            contextual_pretooluse: false,
        }
    }
}

impl OpenRouterConfig {
    /// OpenRouter is only usable when enabled and a key is present.
    pub fn is_usable(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: Option<String>,
    pub voice_id: String,
    pub model_id: String,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_flash_v2_5".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KokoroConfig {
    pub base_url: String,
    pub voice: String,
    pub model: String,
}

impl Default for KokoroConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8880/v1".to_string(),
            voice: "af_sky".to_string(),
            model: "tts-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub base_port: u16,
    pub port_range: u16,
    pub health_attempts: u32,
    pub health_interval_ms: u64,
    pub conflict_retries: u32,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_port: cc_hooks_protocol::BASE_PORT,
            port_range: 100,
            health_attempts: 10,
            health_interval_ms: 1_000,
            conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
    pub grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 10,
            poll_interval_ms: 1_000,
            grace_ms: 3_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-session overrides
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings a single session may override. `None` means "use the global value".
///
/// Stored on the session row and forwarded to the dedicated server as CLI
/// flags, so the same struct doubles as a clap argument group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, clap::Args)]
pub struct SessionOverrides {
    /// TTS language code (e.g. en, fr)
    #[arg(long)]
    pub tts_language: Option<String>,
    /// Comma separated TTS provider chain
    #[arg(long)]
    pub tts_providers: Option<String>,
    #[arg(long)]
    pub tts_cache_enabled: Option<bool>,
    #[arg(long)]
    pub elevenlabs_voice_id: Option<String>,
    #[arg(long)]
    pub elevenlabs_model_id: Option<String>,
    #[arg(long)]
    pub silent_announcements: Option<bool>,
    #[arg(long)]
    pub silent_effects: Option<bool>,
    #[arg(long)]
    pub openrouter_enabled: Option<bool>,
    #[arg(long)]
    pub openrouter_model: Option<String>,
    #[arg(long)]
    pub openrouter_contextual_stop: Option<bool>,
    #[arg(long)]
    pub openrouter_contextual_pretooluse: Option<bool>,
}

impl SessionOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Renders the overrides as `--flag=value` arguments for the server binary.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(format!("--{}={}", flag, value));
            }
        };
        push("tts-language", self.tts_language.clone());
        push("tts-providers", self.tts_providers.clone());
        push("tts-cache-enabled", self.tts_cache_enabled.map(|v| v.to_string()));
        push("elevenlabs-voice-id", self.elevenlabs_voice_id.clone());
        push("elevenlabs-model-id", self.elevenlabs_model_id.clone());
        push("silent-announcements", self.silent_announcements.map(|v| v.to_string()));
        push("silent-effects", self.silent_effects.map(|v| v.to_string()));
        push("openrouter-enabled", self.openrouter_enabled.map(|v| v.to_string()));
        push("openrouter-model", self.openrouter_model.clone());
        push(
            "openrouter-contextual-stop",
            self.openrouter_contextual_stop.map(|v| v.to_string()),
        );
        push(
            "openrouter-contextual-pretooluse",
            self.openrouter_contextual_pretooluse.map(|v| v.to_string()),
        );
        args
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════════════

impl HooksConfig {
    /// Loads the global configuration, falling back to defaults when the file
    /// is missing or malformed, then applies environment overrides.
    pub fn load(paths: &HooksPaths) -> Self {
        let mut config = match Self::load_file(&paths.config_path()) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "Failed to load config file; using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Parses a config file. A missing file yields defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(HooksError::io("Failed to read config file")(err)),
        };
        toml::from_str(&content).map_err(|err| HooksError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |key: &str| {
            let raw = text(key)?;
            let parsed = parse_bool(&raw);
            if parsed.is_none() {
                warn!(key, value = %raw, "Ignoring non-boolean environment value");
            }
            parsed
        };

        if let Some(value) = text("DB_PATH") {
            self.server.db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = text("HOST") {
            self.server.host = value;
        }
        if let Some(value) = text("MAX_RETRY_COUNT") {
            match value.trim().parse::<u32>() {
                Ok(count) if count > 0 => self.server.max_retry_count = count,
                _ => warn!(value = %value, "Ignoring invalid MAX_RETRY_COUNT"),
            }
        }
        if let Some(value) = text("CC_HOOKS_SERVER_BIN") {
            self.server.server_bin = Some(PathBuf::from(value));
        }

        if let Some(value) = text("TTS_PROVIDERS") {
            self.audio.providers = value;
        }
        if let Some(value) = text("TTS_LANGUAGE") {
            self.audio.language = value;
        }
        if let Some(value) = flag("TTS_CACHE_ENABLED") {
            self.audio.cache_enabled = value;
        }
        if let Some(value) = text("CC_HOOKS_PLAYER") {
            self.audio.player = Some(value);
        }
        if let Some(value) = text("CC_HOOKS_SOUND_DIR") {
            self.audio.sound_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = flag("SILENT_ANNOUNCEMENTS") {
            self.silent.announcements = value;
        }
        if let Some(value) = flag("SILENT_EFFECTS") {
            self.silent.effects = value;
        }

        if let Some(value) = text("ELEVENLABS_API_KEY") {
            self.elevenlabs.api_key = Some(value);
        }
        if let Some(value) = text("ELEVENLABS_VOICE_ID") {
            self.elevenlabs.voice_id = value;
        }
        if let Some(value) = text("ELEVENLABS_MODEL_ID") {
            self.elevenlabs.model_id = value;
        }

        if let Some(value) = text("KOKORO_BASE_URL") {
            self.kokoro.base_url = value;
        }
        if let Some(value) = text("KOKORO_VOICE") {
            self.kokoro.voice = value;
        }
        if let Some(value) = text("KOKORO_MODEL") {
            self.kokoro.model = value;
        }

        if let Some(value) = text("OPENROUTER_API_KEY") {
            self.openrouter.api_key = Some(value);
        }
        if let Some(value) = flag("OPENROUTER_ENABLED") {
            self.openrouter.enabled = value;
        }
        if let Some(value) = text("OPENROUTER_MODEL") {
            self.openrouter.model = value;
        }
        if let Some(value) = flag("OPENROUTER_CONTEXTUAL_STOP") {
            self.openrouter.contextual_stop = value;
        }
        if let Some(value) = flag("OPENROUTER_CONTEXTUAL_PRETOOLUSE") {
            self.openrouter.contextual_pretooluse = value;
        }
    }

    /// Returns a copy with session overrides layered on top.
    pub fn with_overrides(&self, overrides: &SessionOverrides) -> Self {
        let mut config = self.clone();
        if let Some(value) = &overrides.tts_language {
            config.audio.language = value.clone();
        }
        if let Some(value) = &overrides.tts_providers {
            config.audio.providers = value.clone();
        }
        if let Some(value) = overrides.tts_cache_enabled {
            config.audio.cache_enabled = value;
        }
        if let Some(value) = &overrides.elevenlabs_voice_id {
            config.elevenlabs.voice_id = value.clone();
        }
        if let Some(value) = &overrides.elevenlabs_model_id {
            config.elevenlabs.model_id = value.clone();
        }
        if let Some(value) = overrides.silent_announcements {
            config.silent.announcements = value;
        }
        if let Some(value) = overrides.silent_effects {
            config.silent.effects = value;
        }
        if let Some(value) = overrides.openrouter_enabled {
            config.openrouter.enabled = value;
        }
        if let Some(value) = &overrides.openrouter_model {
            config.openrouter.model = value.clone();
        }
        if let Some(value) = overrides.openrouter_contextual_stop {
            config.openrouter.contextual_stop = value;
        }
        if let Some(value) = overrides.openrouter_contextual_pretooluse {
            config.openrouter.contextual_pretooluse = value;
        }
        config
    }

    pub fn db_path(&self, paths: &HooksPaths) -> PathBuf {
        self.server
            .db_path
            .clone()
            .unwrap_or_else(|| paths.db_path())
    }

    pub fn sound_dir(&self, paths: &HooksPaths) -> PathBuf {
        self.audio
            .sound_dir
            .clone()
            .unwrap_or_else(|| paths.sound_dir())
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = HooksConfig::load_file(&temp_dir.path().join("config.toml")).expect("load");
        assert_eq!(config, HooksConfig::default());
        assert_eq!(config.server.max_retry_count, 3);
        assert_eq!(config.launcher.base_port, 12222);
        assert_eq!(config.audio.providers, "prerecorded");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[audio]\nproviders = \"kokoro,prerecorded\"\n\n[silent]\neffects = true\n",
        )
        .expect("write config");

        let config = HooksConfig::load_file(&path).expect("load");
        assert_eq!(config.audio.providers, "kokoro,prerecorded");
        assert_eq!(config.audio.language, "en");
        assert!(config.silent.effects);
        assert!(!config.silent.announcements);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[audio\nproviders = ").expect("write config");

        let err = HooksConfig::load_file(&path).unwrap_err();
        assert!(matches!(err, HooksError::ConfigMalformed { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = HooksConfig::default();
        config.apply_env(lookup(&[
            ("MAX_RETRY_COUNT", "5"),
            ("TTS_PROVIDERS", "gtts"),
            ("SILENT_ANNOUNCEMENTS", "yes"),
            ("OPENROUTER_ENABLED", "maybe"),
            ("OPENROUTER_API_KEY", "sk-test"),
            ("HOST", ""),
        ]));

        assert_eq!(config.server.max_retry_count, 5);
        assert_eq!(config.audio.providers, "gtts");
        assert!(config.silent.announcements);
        assert!(!config.openrouter.enabled);
        assert_eq!(config.openrouter.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn zero_retry_count_is_ignored() {
        let mut config = HooksConfig::default();
        config.apply_env(lookup(&[("MAX_RETRY_COUNT", "0")]));
        assert_eq!(config.server.max_retry_count, 3);
    }

    #[test]
    fn session_overrides_win() {
        let base = HooksConfig::default();
        let overrides = SessionOverrides {
            tts_language: Some("fr".to_string()),
            silent_effects: Some(true),
            openrouter_contextual_stop: Some(true),
            ..SessionOverrides::default()
        };

        let config = base.with_overrides(&overrides);
        assert_eq!(config.audio.language, "fr");
        assert!(config.silent.effects);
        assert!(config.openrouter.contextual_stop);
        assert_eq!(config.audio.providers, base.audio.providers);
    }

    #[test]
    fn overrides_render_as_server_flags() {
        let overrides = SessionOverrides {
            tts_providers: Some("kokoro,gtts".to_string()),
            silent_announcements: Some(false),
            ..SessionOverrides::default()
        };
        assert_eq!(
            overrides.to_args(),
            vec![
                "--tts-providers=kokoro,gtts".to_string(),
                "--silent-announcements=false".to_string(),
            ]
        );
        assert!(SessionOverrides::default().is_empty());
        assert!(SessionOverrides::default().to_args().is_empty());
    }

    #[test]
    fn openrouter_requires_key_to_be_usable() {
        let mut config = OpenRouterConfig {
            enabled: true,
            ..OpenRouterConfig::default()
        };
        assert!(!config.is_usable());
        config.api_key = Some("sk".to_string());
        assert!(config.is_usable());
    }
}
