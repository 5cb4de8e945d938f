// Server configuration, read from the environment (and `.env`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tts_core::ModelCatalog;

/// Variants loaded before the server starts accepting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preload {
    None,
    /// The three 1.7b families
    All,
    Keys(Vec<String>),
}

impl Preload {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Preload::None,
            "all" => Preload::All,
            _ => Preload::Keys(
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Preload::None => Vec::new(),
            Preload::All => ["custom_voice_1.7b", "voice_design_1.7b", "base_1.7b"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Preload::Keys(keys) => keys.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub model_catalog: PathBuf,
    pub models_dir: String,
    pub preload: Preload,
    pub inference_url: String,
    pub inference_timeout_secs: Option<u64>,
    pub enable_video: bool,
    pub newavata_api_url: String,
    pub video_timeout_secs: u64,
    pub video_output_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            request_timeout_secs: 300,
            cors_allowed_origins: None,
            model_catalog: PathBuf::from("models/catalog.json"),
            models_dir: "models".into(),
            preload: Preload::Keys(vec!["custom_voice_0.6b".into()]),
            inference_url: "http://127.0.0.1:9000".into(),
            inference_timeout_secs: None,
            enable_video: false,
            newavata_api_url: "http://127.0.0.1:8001".into(),
            video_timeout_secs: 300,
            video_output_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let enable_video = var("ENABLE_VIDEO")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.enable_video);

        Self {
            host: var("TTS_HOST").unwrap_or(defaults.host),
            port: parsed(&var, "TTS_PORT").unwrap_or(defaults.port),
            request_timeout_secs: parsed(&var, "REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins,
            model_catalog: var("TTS_MODEL_CATALOG").map(PathBuf::from).unwrap_or(defaults.model_catalog),
            models_dir: var("TTS_MODELS_DIR").unwrap_or(defaults.models_dir),
            preload: var("TTS_DEFAULT_MODEL")
                .map(|v| Preload::parse(&v))
                .unwrap_or(defaults.preload),
            inference_url: var("TTS_INFERENCE_URL").unwrap_or(defaults.inference_url),
            inference_timeout_secs: parsed(&var, "TTS_INFERENCE_TIMEOUT_SECS").filter(|&s: &u64| s > 0),
            enable_video,
            newavata_api_url: var("NEWAVATA_API_URL").unwrap_or(defaults.newavata_api_url),
            video_timeout_secs: parsed(&var, "VIDEO_TIMEOUT_SECS").unwrap_or(defaults.video_timeout_secs),
            video_output_dir: var("VIDEO_OUTPUT_DIR").map(PathBuf::from),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_secs(self.video_timeout_secs)
    }

    /// Catalog file if present, otherwise the built-in Qwen3-TTS checkpoints.
    pub fn load_catalog(&self) -> anyhow::Result<ModelCatalog> {
        if self.model_catalog.exists() {
            ModelCatalog::from_file(&self.model_catalog)
        } else {
            tracing::warn!(
                path = %self.model_catalog.display(),
                "Model catalog not found, using built-in catalog under {}",
                self.models_dir
            );
            Ok(ModelCatalog::builtin(&self.models_dir))
        }
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
