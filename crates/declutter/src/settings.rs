//! Runtime settings resolved from the environment.
//!
//! Everything tunable lives under the `DECLUTTER_` prefix. The API key
//! can come from `DECLUTTER_API_KEY` directly or, for the Docker
//! secrets pattern, from a file named by `DECLUTTER_API_KEY_FILE`.
//! Unset variables fall back to defaults; set-but-malformed variables
//! are configuration errors rather than silent fallbacks.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secrecy::SecretString;

use crate::error::ConfigError;

pub const BACKEND_VAR: &str = "DECLUTTER_BACKEND";
pub const API_BASE_VAR: &str = "DECLUTTER_API_BASE";
pub const API_KEY_VAR: &str = "DECLUTTER_API_KEY";
pub const API_KEY_FILE_VAR: &str = "DECLUTTER_API_KEY_FILE";
pub const SETTINGS_TTL_VAR: &str = "DECLUTTER_SETTINGS_TTL_SECS";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_PLAN_MODEL: &str = "gpt-4o-mini";
const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
const DEFAULT_SPEECH_MODEL: &str = "tts-1";
const DEFAULT_SPEECH_VOICE: &str = "alloy";

/// Which generation implementation serves plan/image/speech requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackend {
    /// Deterministic in-process generation; the default, and what
    /// tests run against.
    Stub,
    /// Hosted OpenAI-compatible API.
    OpenAi,
}

impl GenerationBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "stub" => Some(Self::Stub),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::OpenAi => "openai",
        }
    }
}

/// One immutable snapshot of configuration.
///
/// Services hold snapshots behind [`SettingsProvider`] so long-running
/// processes pick up rotated credentials without restarting.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: GenerationBackend,
    pub api_base: String,
    pub api_key: Option<SecretString>,
    pub plan_model: String,
    pub image_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    /// Replaces the built-in plan instruction when set. Creativity
    /// guidance and the keep-items clause are still appended.
    pub plan_prompt: Option<String>,
    /// When off, jobs complete without the speech synthesis call.
    pub narration_enabled: bool,

    /// How long a claim blocks rival processors before it is considered
    /// abandoned and may be retaken.
    pub claim_timeout: Duration,
    /// How long a job may sit in `processing` before a status read
    /// reaps it as failed. Longer than `claim_timeout` so a slow claim
    /// holder loses the claim before the job itself is written off.
    pub processing_timeout: Duration,
    /// Wall-clock budget for one generation pass.
    pub generation_budget: Duration,
    /// Minimum gap between `last_accessed_at` writes for one job.
    pub touch_interval: Duration,
    /// How far back owner listings reach by default.
    pub owner_window: Duration,

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    pub database_path: Option<PathBuf>,
    pub artifact_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::Stub,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            plan_model: DEFAULT_PLAN_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            speech_voice: DEFAULT_SPEECH_VOICE.to_string(),
            plan_prompt: None,
            narration_enabled: true,
            claim_timeout: Duration::from_secs(300),
            processing_timeout: Duration::from_secs(600),
            generation_budget: Duration::from_secs(60),
            touch_interval: Duration::from_secs(180),
            owner_window: Duration::from_secs(86_400),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_millis(8_000),
            database_path: None,
            artifact_root: None,
        }
    }
}

impl Settings {
    /// Reads settings from the environment.
    ///
    /// Fails when a set variable does not parse, or when the OpenAI
    /// backend is selected without a credential.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match env_string(BACKEND_VAR) {
            Some(raw) => {
                GenerationBackend::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    name: BACKEND_VAR.to_string(),
                    value: raw,
                    reason: "expected 'stub' or 'openai'".to_string(),
                })?
            }
            None => defaults.backend,
        };

        let api_key = resolve_api_key()?;
        if backend == GenerationBackend::OpenAi && api_key.is_none() {
            return Err(ConfigError::MissingCredential);
        }

        Ok(Self {
            backend,
            api_base: env_string(API_BASE_VAR)
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key,
            plan_model: env_string("DECLUTTER_PLAN_MODEL").unwrap_or(defaults.plan_model),
            image_model: env_string("DECLUTTER_IMAGE_MODEL").unwrap_or(defaults.image_model),
            speech_model: env_string("DECLUTTER_SPEECH_MODEL").unwrap_or(defaults.speech_model),
            speech_voice: env_string("DECLUTTER_SPEECH_VOICE").unwrap_or(defaults.speech_voice),
            plan_prompt: env_string("DECLUTTER_PLAN_PROMPT"),
            narration_enabled: env_parse("DECLUTTER_NARRATION")?
                .unwrap_or(defaults.narration_enabled),
            claim_timeout: env_duration_secs("DECLUTTER_CLAIM_TIMEOUT_SECS")?
                .unwrap_or(defaults.claim_timeout),
            processing_timeout: env_duration_secs("DECLUTTER_PROCESSING_TIMEOUT_SECS")?
                .unwrap_or(defaults.processing_timeout),
            generation_budget: env_duration_secs("DECLUTTER_GENERATION_BUDGET_SECS")?
                .unwrap_or(defaults.generation_budget),
            touch_interval: env_duration_secs("DECLUTTER_TOUCH_INTERVAL_SECS")?
                .unwrap_or(defaults.touch_interval),
            owner_window: env_duration_secs("DECLUTTER_OWNER_WINDOW_SECS")?
                .unwrap_or(defaults.owner_window),
            retry_max_attempts: env_parse("DECLUTTER_RETRY_MAX_ATTEMPTS")?
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay: env_duration_millis("DECLUTTER_RETRY_BASE_DELAY_MS")?
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_duration_millis("DECLUTTER_RETRY_MAX_DELAY_MS")?
                .unwrap_or(defaults.retry_max_delay),
            database_path: env_string("DECLUTTER_DATABASE_PATH").map(PathBuf::from),
            artifact_root: env_string("DECLUTTER_ARTIFACT_ROOT").map(PathBuf::from),
        })
    }
}

/// Resolves the API key in priority order: direct env var, then the
/// file named by `DECLUTTER_API_KEY_FILE`. Empty values are treated as
/// unset; file contents are trimmed because mounted secrets usually
/// carry a trailing newline.
fn resolve_api_key() -> Result<Option<SecretString>, ConfigError> {
    if let Some(value) = env_string(API_KEY_VAR) {
        return Ok(Some(SecretString::from(value)));
    }

    if let Some(path) = env_string(API_KEY_FILE_VAR) {
        let path = PathBuf::from(path);
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadCredential {
            path: path.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return Ok(Some(SecretString::from(trimmed.to_string())));
        }
    }

    Ok(None)
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn env_duration_secs(name: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_duration_millis(name: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

/// Source of configuration snapshots for long-running services.
pub trait SettingsProvider: Send + Sync {
    /// Current snapshot. Implementations may serve a cached value.
    fn current(&self) -> Arc<Settings>;

    /// Drops any cached snapshot so the next `current()` re-reads the
    /// underlying source.
    fn invalidate(&self);
}

/// Fixed settings, for tests and embedders that configure in code.
pub struct StaticSettings {
    settings: Arc<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    fn invalidate(&self) {}
}

struct CachedEnv {
    settings: Arc<Settings>,
    loaded_at: Instant,
}

/// Environment-backed settings with a short-lived cache.
///
/// Re-reads the environment once the cache ages past the TTL. A failed
/// re-read keeps serving the last good snapshot so a transiently
/// missing credential file cannot take down in-flight work.
pub struct EnvSettings {
    ttl: Duration,
    cached: Mutex<Option<CachedEnv>>,
}

impl EnvSettings {
    pub fn new() -> Result<Self, ConfigError> {
        let ttl = env_duration_secs(SETTINGS_TTL_VAR)?.unwrap_or(Duration::from_secs(60));
        Self::with_ttl(ttl)
    }

    /// Validates the environment eagerly so misconfiguration surfaces
    /// at startup, not on the first job.
    pub fn with_ttl(ttl: Duration) -> Result<Self, ConfigError> {
        let settings = Settings::from_env()?;
        Ok(Self {
            ttl,
            cached: Mutex::new(Some(CachedEnv {
                settings: Arc::new(settings),
                loaded_at: Instant::now(),
            })),
        })
    }
}

impl SettingsProvider for EnvSettings {
    fn current(&self) -> Arc<Settings> {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = cached.as_ref() {
            if entry.loaded_at.elapsed() < self.ttl {
                return Arc::clone(&entry.settings);
            }
        }

        match Settings::from_env() {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                *cached = Some(CachedEnv {
                    settings: Arc::clone(&fresh),
                    loaded_at: Instant::now(),
                });
                fresh
            }
            Err(e) => match cached.as_mut() {
                Some(entry) => {
                    log::warn!("Failed to refresh settings, keeping last good snapshot: {e}");
                    entry.loaded_at = Instant::now();
                    Arc::clone(&entry.settings)
                }
                None => {
                    // No last-good snapshot to fall back to. Constructed
                    // instances always start with one, so this only means
                    // the very first read raced an invalidate.
                    log::warn!("Failed to load settings, using defaults: {e}");
                    let fallback = Arc::new(Settings::default());
                    *cached = Some(CachedEnv {
                        settings: Arc::clone(&fallback),
                        loaded_at: Instant::now(),
                    });
                    fallback
                }
            },
        }
    }

    fn invalidate(&self) {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = None;
    }
}
