//! HTTP inference worker backend.
//!
//! The worker owns the weights and the accelerator. `load` asks it to bring a
//! checkpoint into memory, `generate` ships one [`GenerationInput`] and gets base64
//! WAV files back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ModelFamily, VariantSpec};
use crate::model::{GenerationInput, ModelHandle, ModelLoader, ModelOutput, SpeechModel};
use crate::wav::decode_wav_base64;

#[derive(Serialize)]
struct LoadRequest<'a> {
    variant: &'a str,
    path: &'a str,
    family: ModelFamily,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    variant: &'a str,
    #[serde(flatten)]
    input: &'a GenerationInput,
}

#[derive(Deserialize)]
struct GenerateResponse {
    sample_rate: u32,
    audio: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteLoader {
    client: Client,
    base_url: String,
}

impl RemoteLoader {
    /// `timeout` bounds each HTTP exchange with the worker, loads included.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build().context("failed to build inference HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelLoader for RemoteLoader {
    async fn load(&self, spec: &VariantSpec) -> anyhow::Result<ModelHandle> {
        let url = format!("{}/load", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoadRequest {
                variant: &spec.key,
                path: &spec.path,
                family: spec.family,
            })
            .send()
            .await
            .with_context(|| format!("cannot reach inference worker at {}", self.base_url))?;
        check_status(response).await?;

        Ok(Arc::new(RemoteModel {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            variant: spec.key.clone(),
        }))
    }
}

pub struct RemoteModel {
    client: Client,
    base_url: String,
    variant: String,
}

#[async_trait]
impl SpeechModel for RemoteModel {
    fn variant(&self) -> &str {
        &self.variant
    }

    async fn generate(&self, input: &GenerationInput) -> anyhow::Result<ModelOutput> {
        let url = format!("{}/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                variant: &self.variant,
                input,
            })
            .send()
            .await
            .with_context(|| format!("cannot reach inference worker at {}", self.base_url))?;
        let body: GenerateResponse = check_status(response)
            .await?
            .json()
            .await
            .context("malformed response from inference worker")?;

        let waveforms = body
            .audio
            .iter()
            .map(|b64| decode_wav_base64(b64).map(|w| w.samples))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(variant = %self.variant, count = waveforms.len(), "Worker returned audio");

        Ok(ModelOutput {
            waveforms,
            sample_rate: body.sample_rate,
        })
    }
}

async fn check_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let text: String = text.chars().take(500).collect();
    bail!("inference worker error ({status}): {text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Waveform;
    use crate::catalog::Backend;
    use crate::params::GenerationParams;
    use crate::request::VoicePrompt;
    use crate::wav::encode_wav_base64;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_worker() -> String {
        async fn load(Json(body): Json<Value>) -> Result<Json<Value>, (StatusCode, String)> {
            if body["path"].as_str().unwrap_or_default().contains("missing") {
                return Err((StatusCode::NOT_FOUND, "no such checkpoint".into()));
            }
            Ok(Json(json!({"ok": true})))
        }

        async fn generate(Json(body): Json<Value>) -> Json<Value> {
            assert_eq!(body["variant"], "base_0.6b");
            assert_eq!(body["voices"][0]["mode"], "clone");
            let n = body["texts"].as_array().map(Vec::len).unwrap_or(0);
            let audio: Vec<String> = (0..n)
                .map(|i| encode_wav_base64(&Waveform::mono(vec![0.0; 10 * (i + 1)], 24_000)).unwrap())
                .collect();
            Json(json!({"sample_rate": 24_000, "audio": audio}))
        }

        let app = Router::new()
            .route("/load", post(load))
            .route("/generate", post(generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/")
    }

    fn spec(path: &str) -> VariantSpec {
        VariantSpec {
            key: "base_0.6b".into(),
            path: path.into(),
            family: ModelFamily::Base,
            backend: Backend::Remote,
        }
    }

    fn input(texts: &[&str]) -> GenerationInput {
        GenerationInput {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            languages: vec!["Auto".into(); texts.len()],
            voices: vec![
                VoicePrompt::Clone {
                    ref_audio: "ref.wav".into(),
                    ref_text: Some("hello".into()),
                    x_vector_only: false,
                };
                texts.len()
            ],
            params: GenerationParams::default(),
            seed: None,
            non_streaming: true,
        }
    }

    #[tokio::test]
    async fn test_load_then_generate() {
        let base = spawn_worker().await;
        let loader = RemoteLoader::new(&base, Some(Duration::from_secs(5))).unwrap();
        assert!(!loader.base_url().ends_with('/'));

        let model = loader.load(&spec("/models/base")).await.unwrap();
        assert_eq!(model.variant(), "base_0.6b");

        let out = model.generate(&input(&["a", "b"])).await.unwrap();
        assert_eq!(out.sample_rate, 24_000);
        assert_eq!(out.waveforms.len(), 2);
        assert_eq!(out.waveforms[1].len(), 20);
    }

    #[tokio::test]
    async fn test_worker_error_is_reported() {
        let base = spawn_worker().await;
        let loader = RemoteLoader::new(&base, None).unwrap();
        let err = loader.load(&spec("/models/missing")).await.err().unwrap();
        let msg = format!("{err:#}");
        assert!(msg.contains("404"), "{msg}");
        assert!(msg.contains("no such checkpoint"), "{msg}");
    }

    #[tokio::test]
    async fn test_unreachable_worker() {
        let loader = RemoteLoader::new("http://127.0.0.1:1", Some(Duration::from_secs(2))).unwrap();
        let err = loader.load(&spec("/models/base")).await.err().unwrap();
        assert!(format!("{err:#}").contains("cannot reach inference worker"));
    }
}
