use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_WAVESPEED_API_BASE: &str = "https://api.wavespeed.ai/api/v3";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_VEO_MODEL: &str = "veo-3.1-fast-generate-preview";
pub const DEFAULT_SEEDREAM_MODEL: &str = "bytedance/seedream-v4/edit";
pub const DEFAULT_FLUX_MODEL: &str = "wavespeed-ai/flux-2-pro/edit";

pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const CONFIG_FILE: &str = "config.json";
pub const WARDROBE_FILE: &str = "wardrobe.json";

/// Endpoints, model ids and on-disk locations used by the engine.
///
/// Every field has a default; `from_env` applies the `*_API_BASE`,
/// `ATELIER_*_MODEL` and `ATELIER_HOME` overrides on top.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_base: String,
    pub wavespeed_api_base: String,
    pub gemini_image_model: String,
    pub veo_model: String,
    pub seedream_model: String,
    pub flux_model: String,
    pub state_dir: PathBuf,
    /// Per-request HTTP timeout for image generation calls.
    pub request_timeout: Duration,
    /// Wavespeed prediction polling.
    pub wavespeed_poll_interval: Duration,
    pub wavespeed_poll_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            wavespeed_api_base: DEFAULT_WAVESPEED_API_BASE.to_string(),
            gemini_image_model: DEFAULT_GEMINI_IMAGE_MODEL.to_string(),
            veo_model: DEFAULT_VEO_MODEL.to_string(),
            seedream_model: DEFAULT_SEEDREAM_MODEL.to_string(),
            flux_model: DEFAULT_FLUX_MODEL.to_string(),
            state_dir: PathBuf::from(".atelier"),
            request_timeout: Duration::from_secs(180),
            wavespeed_poll_interval: Duration::from_secs(1),
            wavespeed_poll_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let state_dir = lookup("ATELIER_HOME")
            .map(PathBuf::from)
            .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".atelier")))
            .unwrap_or(defaults.state_dir);
        Self {
            gemini_api_base: lookup("GEMINI_API_BASE")
                .map(|value| normalize_api_base(&value))
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.gemini_api_base),
            wavespeed_api_base: lookup("WAVESPEED_API_BASE")
                .map(|value| normalize_api_base(&value))
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.wavespeed_api_base),
            gemini_image_model: lookup("ATELIER_GEMINI_IMAGE_MODEL")
                .unwrap_or(defaults.gemini_image_model),
            veo_model: lookup("ATELIER_VEO_MODEL").unwrap_or(defaults.veo_model),
            seedream_model: lookup("ATELIER_SEEDREAM_MODEL").unwrap_or(defaults.seedream_model),
            flux_model: lookup("ATELIER_FLUX_MODEL").unwrap_or(defaults.flux_model),
            state_dir,
            ..defaults
        }
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join(CREDENTIALS_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn wardrobe_path(&self) -> PathBuf {
        self.state_dir.join(WARDROBE_FILE)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    /// A fresh timestamped directory name under [`runs_dir`](Self::runs_dir).
    pub fn new_run_dir(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        self.runs_dir().join(format!("run-{stamp}"))
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
