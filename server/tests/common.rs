//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    extract::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use tts_core::{
    GenerationInput, ModelCatalog, ModelHandle, ModelLoader, ModelOutput, ModelRegistry, SpeechModel, VariantSpec,
};
use tts_server::config::{Preload, ServerConfig};
use tts_server::{router, AppState};
use video_core::VideoDelegate;

pub const SAMPLE_RATE: u32 = 24_000;
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake-video";

/// Texts the fake model was asked for, across every variant
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Fake model: a constant tone, ten samples per input character.
/// Texts containing `BOOM` fail; `SLOW` takes two seconds.
struct Tone {
    key: String,
    calls: CallLog,
}

#[async_trait]
impl SpeechModel for Tone {
    fn variant(&self) -> &str {
        &self.key
    }

    async fn generate(&self, input: &GenerationInput) -> anyhow::Result<ModelOutput> {
        let mut waveforms = Vec::with_capacity(input.len());
        for text in &input.texts {
            self.calls.lock().unwrap().push(text.clone());
            if text.contains("BOOM") {
                anyhow::bail!("device lost");
            }
            if text.contains("SLOW") {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            waveforms.push(vec![0.1; text.chars().count() * 10]);
        }
        Ok(ModelOutput {
            waveforms,
            sample_rate: SAMPLE_RATE,
        })
    }
}

struct ToneLoader {
    calls: CallLog,
}

#[async_trait]
impl ModelLoader for ToneLoader {
    async fn load(&self, spec: &VariantSpec) -> anyhow::Result<ModelHandle> {
        Ok(Arc::new(Tone {
            key: spec.key.clone(),
            calls: self.calls.clone(),
        }))
    }
}

pub struct TestApp {
    pub router: Router,
    pub calls: CallLog,
    pub registry: Arc<ModelRegistry>,
}

impl TestApp {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        preload: Preload::None,
        ..ServerConfig::default()
    }
}

fn build(video: Option<VideoDelegate>) -> TestApp {
    build_with(test_config(), video)
}

fn build_with(config: ServerConfig, video: Option<VideoDelegate>) -> TestApp {
    let calls = CallLog::default();
    let registry = Arc::new(ModelRegistry::new(
        ModelCatalog::builtin("/models"),
        Arc::new(ToneLoader { calls: calls.clone() }),
    ));
    let state = AppState::new(config, registry.clone(), video);
    TestApp {
        router: router(state),
        calls,
        registry,
    }
}

/// Create a test app instance with the video routes disabled
pub fn create_test_app() -> TestApp {
    build(None)
}

/// Create a test app with a custom configuration, video disabled
pub fn create_test_app_with_config(config: ServerConfig) -> TestApp {
    build_with(config, None)
}

/// Create a test app whose video routes talk to a local mock renderer
pub async fn create_video_test_app() -> TestApp {
    let base_url = spawn_mock_renderer().await;
    let delegate = VideoDelegate::new(&base_url, std::time::Duration::from_secs(5)).unwrap();
    build(Some(delegate))
}

/// Minimal stand-in for the NewAvata HTTP API
async fn spawn_mock_renderer() -> String {
    let app = Router::new()
        .route(
            "/api/record",
            post(|Json(body): Json<Value>| async move {
                // The narration must already exist on disk when the renderer is called
                let audio_ok = body["audio_path"]
                    .as_str()
                    .map(|p| std::path::Path::new(p).exists())
                    .unwrap_or(false);
                if !audio_ok {
                    return Json(json!({"success": false, "error": "missing audio"}));
                }
                Json(json!({
                    "success": true,
                    "video_url": "/videos/out.mp4",
                    "elapsed": 1.5,
                }))
            }),
        )
        .route(
            "/api/generate",
            post(|| async { Json(json!({"success": true, "position": 3})) }),
        )
        .route("/videos/out.mp4", get(|| async { VIDEO_BYTES.to_vec() }))
        .route(
            "/api/avatars",
            get(|| async { Json(json!([{"name": "alice"}, {"name": "bob"}])) }),
        )
        .route("/api/tts_engines", get(|| async { Json(json!(["qwen3tts", "edge"])) }))
        .route("/api/system_status", get(|| async { Json(json!({"gpu": "ok", "queue": 0})) }))
        .route("/api/availability", get(|| async { Json(json!({"available": true})) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// multipart/form-data body from text fields plus one optional file field
pub fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    if let Some((name, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
