//! HTTP client for the NewAvata lip-sync renderer.

use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::VideoError;
use crate::job::{Quality, RenderMode, VideoJob};

const QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct RenderPayload<'a> {
    text: &'a str,
    avatar_path: &'a str,
    tts_engine: &'a str,
    tts_voice: &'a str,
    quality: Quality,
    sid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_path: Option<&'a str>,
}

/// Result of one render call. Upstream trouble of any kind ends up in `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Finished video. `result` is the renderer's full reply.
    Recorded {
        session_id: String,
        video_url: String,
        elapsed: Duration,
        result: Value,
    },
    /// Accepted into the renderer's queue; completion is pushed out of band.
    Queued { session_id: String, ticket: Value },
    Failed { error: String, timed_out: bool },
}

impl RenderOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RenderOutcome::Failed { .. })
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            RenderOutcome::Recorded { session_id, .. } | RenderOutcome::Queued { session_id, .. } => {
                Some(session_id)
            }
            RenderOutcome::Failed { .. } => None,
        }
    }

    pub fn video_url(&self) -> Option<&str> {
        match self {
            RenderOutcome::Recorded { video_url, .. } => Some(video_url),
            _ => None,
        }
    }

    /// Wire shape: the renderer's reply, or `{success: false, error}`.
    pub fn to_json(&self) -> Value {
        match self {
            RenderOutcome::Recorded { result, .. } => result.clone(),
            RenderOutcome::Queued { ticket, .. } => ticket.clone(),
            RenderOutcome::Failed { error, .. } => json!({"success": false, "error": error}),
        }
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[derive(Debug, Clone)]
pub struct VideoDelegate {
    client: Client,
    base_url: String,
    record_timeout: Duration,
}

impl VideoDelegate {
    pub fn new(base_url: &str, record_timeout: Duration) -> Result<Self, VideoError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(VideoError::InvalidBaseUrl(base_url)),
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            record_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn record_timeout(&self) -> Duration {
        self.record_timeout
    }

    /// Probe the renderer. Only logs; an unreachable renderer does not stop startup.
    pub async fn check_availability(&self) -> bool {
        match self.get_json("/api/availability", AVAILABILITY_TIMEOUT).await {
            Ok(status) => {
                info!(url = %self.base_url, %status, "NewAvata API is available");
                true
            }
            Err(e) => {
                warn!(url = %self.base_url, "NewAvata API not reachable: {e:#}");
                false
            }
        }
    }

    pub async fn render(&self, job: &VideoJob, mode: RenderMode) -> Result<RenderOutcome, VideoError> {
        job.validate()?;

        let session_id = new_session_id();
        let (path, timeout, output_format) = match mode {
            RenderMode::Record => ("/api/record", self.record_timeout, Some("mp4")),
            RenderMode::Generate => ("/api/generate", QUEUE_TIMEOUT, None),
        };
        let payload = RenderPayload {
            text: &job.text,
            avatar_path: &job.avatar,
            tts_engine: &job.engine,
            tts_voice: &job.voice,
            quality: job.quality,
            sid: &session_id,
            output_format,
            audio_path: job.audio_path.as_deref(),
        };

        info!(
            sid = %session_id,
            ?mode,
            avatar = %job.avatar,
            engine = %job.engine,
            quality = %job.quality,
            "Submitting video job"
        );
        let started = Instant::now();

        let response = match self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(self.transport_failure(e, timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = if text.is_empty() {
                "Unknown error".to_string()
            } else {
                truncate(&text, MAX_ERROR_BODY)
            };
            warn!(sid = %session_id, status = status.as_u16(), "NewAvata rejected job");
            return Ok(RenderOutcome::Failed {
                error: format!("NewAvata API error ({}): {}", status.as_u16(), text),
                timed_out: false,
            });
        }

        let mut body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(self.transport_failure(e, timeout)),
        };

        let outcome = match mode {
            RenderMode::Record => {
                let video_url = body.get("video_url").and_then(Value::as_str).map(str::to_string);
                match (body.get("success").and_then(Value::as_bool), video_url) {
                    (Some(false), _) => RenderOutcome::Failed {
                        error: body
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("NewAvata reported a failed render")
                            .to_string(),
                        timed_out: false,
                    },
                    (_, None) => RenderOutcome::Failed {
                        error: "NewAvata API returned no video_url".to_string(),
                        timed_out: false,
                    },
                    (_, Some(video_url)) => RenderOutcome::Recorded {
                        session_id,
                        video_url,
                        elapsed: started.elapsed(),
                        result: body,
                    },
                }
            }
            RenderMode::Generate => {
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("session_id".into(), Value::String(session_id.clone()));
                }
                RenderOutcome::Queued {
                    session_id,
                    ticket: body,
                }
            }
        };

        info!(
            elapsed_s = started.elapsed().as_secs_f64(),
            success = outcome.is_success(),
            "Video job finished"
        );
        Ok(outcome)
    }

    fn transport_failure(&self, e: reqwest::Error, timeout: Duration) -> RenderOutcome {
        let (error, timed_out) = if e.is_timeout() {
            (format!("NewAvata API request timed out (>{}s)", timeout.as_secs()), true)
        } else if e.is_connect() {
            (format!("Cannot connect to NewAvata API at {}", self.base_url), false)
        } else {
            (e.to_string(), false)
        };
        warn!("Video job failed: {error}");
        RenderOutcome::Failed { error, timed_out }
    }

    /// Download a finished video. Locators are paths on the renderer, or absolute
    /// URLs under its base URL.
    ///
    /// Unlike [`render`](Self::render), a failed download is returned as
    /// [`VideoError::Fetch`]: there is no outcome to report at this point, only
    /// bytes or nothing. Callers treat it as an upstream failure.
    pub async fn fetch_video(&self, locator: &str) -> Result<Vec<u8>, VideoError> {
        let url = if locator.starts_with("http://") || locator.starts_with("https://") {
            if !locator.starts_with(&self.base_url) {
                return Err(VideoError::Fetch(format!(
                    "locator '{locator}' is not served by {}",
                    self.base_url
                )));
            }
            locator.to_string()
        } else {
            format!("{}/{}", self.base_url, locator.trim_start_matches('/'))
        };

        let response = self
            .client
            .get(&url)
            .timeout(self.record_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VideoError::Fetch(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VideoError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    pub async fn list_avatars(&self) -> Vec<Value> {
        self.list("/api/avatars").await
    }

    pub async fn list_tts_engines(&self) -> Vec<Value> {
        self.list("/api/tts_engines").await
    }

    pub async fn system_status(&self) -> Value {
        self.get_json("/api/system_status", LIST_TIMEOUT)
            .await
            .unwrap_or_else(|e| json!({ "error": format!("{e:#}") }))
    }

    async fn list(&self, path: &str) -> Vec<Value> {
        match self.get_json(path, LIST_TIMEOUT).await {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                warn!(path, "Expected a JSON list, got {other}");
                Vec::new()
            }
            Err(e) => {
                warn!(path, "NewAvata request failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> anyhow::Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Status code: {}", status.as_u16());
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };

    async fn record(Json(body): Json<Value>) -> axum::response::Response {
        assert_eq!(body["sid"].as_str().map(str::len), Some(8));
        assert_eq!(body["output_format"], "mp4");
        match body["text"].as_str().unwrap_or_default() {
            "crash" => (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(800)).into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"success": true})).into_response()
            }
            "refuse" => Json(json!({"success": false, "error": "avatar not precomputed"})).into_response(),
            "nourl" => Json(json!({"success": true})).into_response(),
            _ => Json(json!({
                "success": true,
                "video_url": "/videos/out.mp4",
                "audio_path": body["audio_path"],
            }))
            .into_response(),
        }
    }

    async fn enqueue(Json(body): Json<Value>) -> Json<Value> {
        assert!(body.get("output_format").is_none());
        Json(json!({"status": "queued", "position": 2}))
    }

    async fn spawn_renderer() -> String {
        let app = Router::new()
            .route("/api/record", post(record))
            .route("/api/generate", post(enqueue))
            .route("/api/availability", get(|| async { Json(json!({"available": true})) }))
            .route(
                "/api/avatars",
                get(|| async { Json(json!([{"name": "anchor"}, {"name": "host"}])) }),
            )
            .route("/api/tts_engines", get(|| async { Json(json!({"not": "a list"})) }))
            .route("/api/system_status", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/videos/out.mp4", get(|| async { b"\x00\x00\x00\x18ftypmp42".to_vec() }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn job(text: &str) -> VideoJob {
        VideoJob::new(text, "auto").unwrap()
    }

    #[tokio::test]
    async fn test_record_and_fetch() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        assert!(delegate.check_availability().await);

        let outcome = delegate
            .render(&job("hello").with_audio("/tmp/narration.wav"), RenderMode::Record)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.session_id().map(str::len), Some(8));
        assert_eq!(outcome.to_json()["audio_path"], "/tmp/narration.wav");
        match &outcome {
            RenderOutcome::Recorded { video_url, elapsed, .. } => {
                assert_eq!(video_url, "/videos/out.mp4");
                assert!(*elapsed > Duration::ZERO);
            }
            other => panic!("expected recorded video, got {other:?}"),
        }

        let video = delegate.fetch_video(outcome.video_url().unwrap()).await.unwrap();
        assert_eq!(&video[4..8], b"ftyp");
    }

    #[tokio::test]
    async fn test_generate_returns_ticket_with_session() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        let outcome = delegate.render(&job("hello"), RenderMode::Generate).await.unwrap();
        match &outcome {
            RenderOutcome::Queued { session_id, ticket } => {
                assert_eq!(ticket["session_id"], session_id.as_str());
                assert_eq!(ticket["position"], 2);
            }
            other => panic!("expected ticket, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upstream_error_is_uniform_failure() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        let outcome = delegate.render(&job("crash"), RenderMode::Record).await.unwrap();
        let body = outcome.to_json();
        assert_eq!(body["success"], false);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("NewAvata API error (500): "));
        assert_eq!(error.len(), "NewAvata API error (500): ".len() + 500);

        let refused = delegate.render(&job("refuse"), RenderMode::Record).await.unwrap();
        assert_eq!(
            refused,
            RenderOutcome::Failed {
                error: "avatar not precomputed".into(),
                timed_out: false
            }
        );
    }

    #[tokio::test]
    async fn test_record_without_locator_fails() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        let outcome = delegate.render(&job("nourl"), RenderMode::Record).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.video_url().is_none());
        assert_eq!(outcome.to_json()["error"], "NewAvata API returned no video_url");
    }

    #[tokio::test]
    async fn test_fetch_missing_video_is_error() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        match delegate.fetch_video("/videos/missing.mp4").await {
            Err(VideoError::Fetch(msg)) => assert!(msg.contains("404")),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_record_timeout_is_bounded() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_millis(300)).unwrap();
        let started = Instant::now();
        let outcome = delegate.render(&job("slow"), RenderMode::Record).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        match outcome {
            RenderOutcome::Failed { error, timed_out } => {
                assert!(timed_out);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_renderer() {
        let delegate = VideoDelegate::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let started = Instant::now();
        let outcome = delegate.render(&job("hello"), RenderMode::Record).await.unwrap();
        assert!(started.elapsed() <= Duration::from_secs(3));
        assert_eq!(outcome.to_json()["success"], false);
        assert!(!delegate.check_availability().await);
        assert!(delegate.list_avatars().await.is_empty());
    }

    #[tokio::test]
    async fn test_listings_never_raise() {
        let delegate = VideoDelegate::new(&spawn_renderer().await, Duration::from_secs(5)).unwrap();
        assert_eq!(delegate.list_avatars().await.len(), 2);
        assert!(delegate.list_tts_engines().await.is_empty());
        assert_eq!(delegate.system_status().await["error"], "Status code: 503");
    }

    #[tokio::test]
    async fn test_malformed_avatar_is_misuse() {
        let delegate = VideoDelegate::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let mut bad = job("hello");
        bad.avatar = "../../secret".into();
        assert!(matches!(
            delegate.render(&bad, RenderMode::Record).await,
            Err(VideoError::MalformedAvatar(_))
        ));
    }

    #[test]
    fn test_base_url_validation() {
        assert!(VideoDelegate::new("ftp://host", Duration::from_secs(1)).is_err());
        assert!(VideoDelegate::new("not a url", Duration::from_secs(1)).is_err());
        let d = VideoDelegate::new("http://host:8001/", Duration::from_secs(1)).unwrap();
        assert_eq!(d.base_url(), "http://host:8001");
    }

    #[tokio::test]
    async fn test_foreign_locator_is_rejected() {
        let delegate = VideoDelegate::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            delegate.fetch_video("http://elsewhere/x.mp4").await,
            Err(VideoError::Fetch(_))
        ));
    }
}
