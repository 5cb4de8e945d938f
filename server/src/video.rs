// Lip-sync video routes, mounted only when ENABLE_VIDEO is set

use std::path::{Path, PathBuf};
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::info;

use tts_core::wav::encode_wav;
use tts_core::{variant_key, SplitMode, SynthesisRequest, VoiceMode};
use video_core::{
    validate_avatar, Quality, RenderMode, RenderOutcome, VideoDelegate, VideoError, VideoJob, AUTO_AVATAR,
    DEFAULT_ENGINE, DEFAULT_VOICE,
};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::handlers::seconds_header;
use crate::validation::validate_model_size;
use crate::AppState;

/// Upper bound for a `/video/generate` multipart body (avatar image included).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const DEFAULT_VIDEO_LANGUAGE: &str = "Korean";
const DEFAULT_VIDEO_MODEL_SIZE: &str = "0.6b";

fn delegate(state: &AppState) -> Result<&VideoDelegate, ApiError> {
    state.video.as_deref().ok_or(ApiError::VideoDisabled)
}

fn failed_render(error: String, timed_out: bool) -> ApiError {
    if timed_out {
        ApiError::Timeout(error)
    } else {
        ApiError::UpstreamUnavailable(error)
    }
}

/// Fields of the `/video/generate` form
#[derive(Debug, Default)]
struct VideoForm {
    text: Option<String>,
    language: Option<String>,
    ref_audio: Option<String>,
    ref_text: Option<String>,
    model_size: Option<String>,
    x_vector_only_mode: Option<bool>,
    avatar: Option<String>,
    quality: Option<String>,
    avatar_image: Option<(Vec<u8>, String)>,
}

fn parse_flag(value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ApiError::InvalidInput(format!("Invalid x_vector_only_mode '{other}'"))),
    }
}

fn image_suffix(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| ".jpg".to_string())
}

impl VideoForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = VideoForm::default();
        let bad_form = |e: axum::extract::multipart::MultipartError| ApiError::InvalidInput(e.body_text());

        while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "avatar_image" {
                let suffix = image_suffix(field.file_name());
                let bytes = field.bytes().await.map_err(bad_form)?;
                form.avatar_image = Some((bytes.to_vec(), suffix));
                continue;
            }

            let value = field.text().await.map_err(bad_form)?;
            match name.as_str() {
                "text" => form.text = Some(value),
                "language" => form.language = Some(value),
                "ref_audio" => form.ref_audio = Some(value),
                "ref_text" => form.ref_text = Some(value),
                "model_size" => form.model_size = Some(value),
                "x_vector_only_mode" => form.x_vector_only_mode = Some(parse_flag(&value)?),
                "avatar" => form.avatar = Some(value).filter(|v| !v.trim().is_empty()),
                "quality" => form.quality = Some(value).filter(|v| !v.trim().is_empty()),
                _ => {}
            }
        }
        Ok(form)
    }

    fn synthesis_request(&self) -> Result<SynthesisRequest, ApiError> {
        let text = self
            .text
            .clone()
            .ok_or_else(|| ApiError::InvalidInput("Missing form field 'text'".into()))?;
        let ref_audio = self
            .ref_audio
            .clone()
            .ok_or_else(|| ApiError::InvalidInput("Missing form field 'ref_audio'".into()))?;

        let mut request = SynthesisRequest::new(text);
        request.language = self
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_VIDEO_LANGUAGE.to_string())
            .into();
        request.ref_audio = Some(ref_audio.into());
        request.ref_text = self.ref_text.clone().map(Into::into);
        request.x_vector_only_mode = self.x_vector_only_mode.unwrap_or(true);
        request.split_sentences = SplitMode::Always;
        Ok(request)
    }
}

/// Where transient narration and avatar files go: VIDEO_OUTPUT_DIR or the OS temp dir.
pub fn artifact_dir(config: &ServerConfig) -> PathBuf {
    config.video_output_dir.clone().unwrap_or_else(std::env::temp_dir)
}

/// Uploaded avatars are handed to the renderer by path, so the artifact
/// directory must itself be a valid avatar reference. Checked at startup.
pub fn check_artifact_dir(dir: &Path) -> Result<(), VideoError> {
    let dir = dir.to_str().ok_or_else(|| VideoError::MalformedAvatar(dir.display().to_string()))?;
    validate_avatar(dir.trim_end_matches('/'))
}

/// Transient file under the artifact directory. Removed on drop.
async fn write_artifact(dir: &Path, prefix: &str, suffix: &str, bytes: &[u8]) -> Result<NamedTempFile, ApiError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("Cannot create {}: {e}", dir.display())))?;
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| ApiError::InternalError(format!("Cannot create temporary file: {e}")))?;

    tokio::fs::write(file.path(), bytes)
        .await
        .map_err(|e| ApiError::InternalError(format!("Cannot write {}: {e}", file.path().display())))?;
    Ok(file)
}

fn path_string(file: &NamedTempFile) -> String {
    file.path().to_string_lossy().into_owned()
}

/// `POST /video/generate`: clone-voice narration rendered onto an avatar, returned as MP4.
pub async fn generate_video(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let started = Instant::now();

    let outcome = render_video(&state, multipart, started).await;

    state.metrics.video.record_request(started.elapsed());
    if outcome.is_err() {
        state.metrics.video.record_error();
    }
    outcome
}

async fn render_video(state: &AppState, multipart: Multipart, started: Instant) -> Result<Response, ApiError> {
    let delegate = delegate(state)?;
    let form = VideoForm::read(multipart).await?;

    let size = validate_model_size(form.model_size.as_deref().unwrap_or(DEFAULT_VIDEO_MODEL_SIZE))?;
    let variant = variant_key(VoiceMode::VoiceClone, size);
    let request = form.synthesis_request()?.normalize(VoiceMode::VoiceClone)?;
    let quality = form
        .quality
        .as_deref()
        .map(str::parse::<Quality>)
        .transpose()?
        .unwrap_or_default();

    // Everything but the narration is validated before any TTS work
    let output_dir = artifact_dir(&state.config);
    let avatar_file = match &form.avatar_image {
        Some((bytes, suffix)) => Some(write_artifact(&output_dir, "avatar-", suffix, bytes).await?),
        None => None,
    };
    let avatar = match (&form.avatar, &avatar_file) {
        (Some(avatar), _) => avatar.trim().to_string(),
        (None, Some(file)) => path_string(file),
        (None, None) => AUTO_AVATAR.to_string(),
    };
    let text = request.items.first().map(|item| item.text.clone()).unwrap_or_default();
    let job = VideoJob::new(text, avatar)?.with_quality(quality);

    info!(variant = %variant, "Video step 1/2: generating narration");
    let result = state.coordinator.synthesize(&variant, &request).await?;
    let tts_time = result.elapsed;
    let wav = encode_wav(&result.merged()?)?;
    let audio_file = write_artifact(&output_dir, "narration-", ".wav", &wav).await?;
    let job = job.with_audio(path_string(&audio_file));

    info!(tts_secs = tts_time.as_secs_f64(), "Video step 2/2: rendering lip-sync video");
    let video = match delegate.render(&job, RenderMode::Record).await? {
        RenderOutcome::Recorded { video_url, elapsed, .. } => {
            info!(render_secs = elapsed.as_secs_f64(), "Renderer finished");
            delegate.fetch_video(&video_url).await?
        }
        RenderOutcome::Failed { error, timed_out } => return Err(failed_render(error, timed_out)),
        RenderOutcome::Queued { .. } => {
            return Err(ApiError::InternalError("record render came back queued".into()))
        }
    };

    let total = started.elapsed();
    info!(
        total_secs = total.as_secs_f64(),
        tts_secs = tts_time.as_secs_f64(),
        bytes = video.len(),
        "Video generated"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, "attachment; filename=output.mp4".to_string()),
            (header::HeaderName::from_static("x-generation-time"), seconds_header(total)),
            (header::HeaderName::from_static("x-tts-time"), seconds_header(tts_time)),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                "X-Generation-Time, X-TTS-Time".to_string(),
            ),
        ],
        video,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    pub text: String,
    #[serde(default = "default_avatar")]
    pub avatar: String,
    #[serde(default = "default_engine")]
    pub tts_engine: String,
    #[serde(default = "default_voice")]
    pub tts_voice: String,
    #[serde(default)]
    pub quality: Option<String>,
}

fn default_avatar() -> String {
    AUTO_AVATAR.to_string()
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

/// `POST /video/queue`: hand the job to the renderer's own TTS and queue.
pub async fn queue_video(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let outcome = async {
        let delegate = delegate(&state)?;
        let Json(body) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

        let quality = body.quality.as_deref().map(str::parse::<Quality>).transpose()?.unwrap_or_default();
        let job = VideoJob::new(body.text, body.avatar)?
            .with_engine(body.tts_engine, body.tts_voice)
            .with_quality(quality);

        match delegate.render(&job, RenderMode::Generate).await? {
            RenderOutcome::Failed { error, timed_out } => Err(failed_render(error, timed_out)),
            queued => {
                info!(session_id = queued.session_id().unwrap_or_default(), "Video job queued");
                Ok(Json(queued.to_json()))
            }
        }
    }
    .await;

    state.metrics.video.record_request(started.elapsed());
    if outcome.is_err() {
        state.metrics.video.record_error();
    }
    outcome
}

pub async fn list_avatars(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let avatars = delegate(&state)?.list_avatars().await;
    Ok(Json(json!({ "avatars": avatars })))
}

pub async fn list_engines(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let engines = delegate(&state)?.list_tts_engines().await;
    Ok(Json(json!({ "engines": engines })))
}

pub async fn system_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(delegate(&state)?.system_status().await))
}

pub async fn video_disabled() -> ApiError {
    ApiError::VideoDisabled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_suffix() {
        assert_eq!(image_suffix(Some("me.PNG")), ".png");
        assert_eq!(image_suffix(Some("noext")), ".jpg");
        assert_eq!(image_suffix(Some("odd.p g")), ".jpg");
        assert_eq!(image_suffix(None), ".jpg");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(matches!(parse_flag("maybe"), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_form_defaults_to_segmented_clone() {
        let form = VideoForm {
            text: Some("Hello there. Bye.".into()),
            ref_audio: Some("https://example.test/ref.wav".into()),
            ..Default::default()
        };
        let request = form.synthesis_request().unwrap();
        assert!(request.x_vector_only_mode);
        assert_eq!(request.split_sentences, SplitMode::Always);

        let normalized = request.normalize(VoiceMode::VoiceClone).unwrap();
        assert_eq!(normalized.items[0].language, "Korean");
        assert!(normalized.segmentation_enabled());
    }

    #[test]
    fn test_form_requires_text_and_reference() {
        let form = VideoForm {
            text: Some("hi".into()),
            ..Default::default()
        };
        assert!(matches!(form.synthesis_request(), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_artifact_dir_must_be_a_valid_avatar_path() {
        assert!(check_artifact_dir(Path::new("/var/lib/tts/video-artifacts/")).is_ok());
        assert!(check_artifact_dir(Path::new("/srv/video out")).is_err());
        assert!(check_artifact_dir(Path::new("/srv/vidéo")).is_err());

        let config = ServerConfig {
            video_output_dir: Some(PathBuf::from("/data/videos")),
            ..ServerConfig::default()
        };
        assert_eq!(artifact_dir(&config), PathBuf::from("/data/videos"));
    }

    #[test]
    fn test_failed_render_statuses() {
        assert!(matches!(failed_render("slow".into(), true), ApiError::Timeout(_)));
        assert!(matches!(failed_render("down".into(), false), ApiError::UpstreamUnavailable(_)));
    }
}
