use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use tts_core::catalog::{AVAILABLE_SPEAKERS, SUPPORTED_LANGUAGES};
use tts_core::encode::format_secs;
use tts_core::wav::encode_wav;
use tts_core::{
    encode, run_session, variant_key, DeliveryMode, EncodedResponse, NormalizedRequest, SessionState,
    StreamEvent, StreamSession, SynthesisRequest, SynthesisResult, VoiceMode, Waveform,
};

use crate::error::ApiError;
use crate::metrics::MetricsResponse;
use crate::validation::{parse_mode, validate_model_size};
use crate::AppState;

const SSE_BUFFER: usize = 16;
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        models_loaded: state.registry.list_loaded(),
    })
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub loaded_models: Vec<String>,
    pub available_models: Vec<String>,
    pub available_speakers: &'static [&'static str],
    pub supported_languages: &'static [&'static str],
    pub video_enabled: bool,
}

pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        loaded_models: state.registry.list_loaded(),
        available_models: state.registry.list_available(),
        available_speakers: AVAILABLE_SPEAKERS,
        supported_languages: SUPPORTED_LANGUAGES,
        video_enabled: state.video.is_some(),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let request_count = state.request_count.load(Ordering::Relaxed);
    Json(MetricsResponse::snapshot(&state.metrics, request_count))
}

#[derive(Serialize)]
pub struct LoadResponse {
    pub success: bool,
    pub message: String,
}

pub async fn load_variant(
    State(state): State<AppState>,
    Path(variant): Path<String>,
) -> Result<Json<LoadResponse>, ApiError> {
    state.registry.resolve(&variant).await?;
    Ok(Json(LoadResponse {
        success: true,
        message: format!("Model {variant} loaded successfully"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SizeQuery {
    pub model_size: Option<String>,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::InvalidInput(e.body_text()))
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| ApiError::InvalidInput(e.body_text()))
}

fn resolve_variant(mode: VoiceMode, model_size: Option<&str>) -> Result<String, ApiError> {
    let size = validate_model_size(model_size.unwrap_or(mode.default_size()))?;
    Ok(variant_key(mode, size))
}

fn record_synthesis(state: &AppState, result: &SynthesisResult) {
    let audio_ms = result.waveforms.iter().map(Waveform::duration_ms).sum();
    state
        .metrics
        .synthesis
        .record(result.elapsed, result.waveforms.len(), result.total_samples(), audio_ms);
}

fn wav_response(wav: Vec<u8>, elapsed: Duration) -> Response {
    (
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, "attachment; filename=output.wav".to_string()),
            (header::HeaderName::from_static("x-generation-time"), seconds_header(elapsed)),
            (header::ACCESS_CONTROL_EXPOSE_HEADERS, "X-Generation-Time".to_string()),
        ],
        wav,
    )
        .into_response()
}

fn encoded_response(encoded: EncodedResponse) -> Response {
    match encoded {
        EncodedResponse::Audio { wav, elapsed } => wav_response(wav, elapsed),
        EncodedResponse::Envelope(envelope) => Json(envelope).into_response(),
    }
}

/// `POST /tts/{mode}`: one WAV for scalar text, a JSON envelope for lists.
pub async fn synthesize(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    query: Result<Query<SizeQuery>, QueryRejection>,
    payload: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let outcome = match query_params(query) {
        Ok(query) => run_synthesis(&state, &mode, query.model_size.as_deref(), payload).await,
        Err(e) => Err(e),
    };

    state.metrics.tts.record_request(started.elapsed());
    if outcome.is_err() {
        state.metrics.tts.record_error();
    }
    outcome
}

async fn run_synthesis(
    state: &AppState,
    mode: &str,
    model_size: Option<&str>,
    payload: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mode = parse_mode(mode)?;
    let variant = resolve_variant(mode, model_size)?;
    let request = json_body(payload)?.normalize(mode)?;

    info!(
        variant = %variant,
        items = request.items.len(),
        segmented = request.segmentation_enabled(),
        "Synthesis request"
    );

    let result = state.coordinator.synthesize(&variant, &request).await?;
    record_synthesis(state, &result);

    let encoded = encode(&result, DeliveryMode::for_request(&request))?;
    Ok(encoded_response(encoded))
}

#[derive(Debug, Deserialize)]
pub struct SpeakQuery {
    pub text: String,
    #[serde(default = "default_speak_speaker")]
    pub speaker: String,
    #[serde(default = "default_speak_language")]
    pub language: String,
    #[serde(default)]
    pub instruct: String,
    pub model_size: Option<String>,
}

fn default_speak_speaker() -> String {
    "Sohee".to_string()
}

fn default_speak_language() -> String {
    "Korean".to_string()
}

/// `GET /tts/speak`: named-speaker synthesis from query parameters, always WAV.
pub async fn speak(
    State(state): State<AppState>,
    query: Result<Query<SpeakQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let outcome = async {
        let query = query_params(query)?;
        let mode = VoiceMode::CustomVoice;
        let variant = resolve_variant(mode, query.model_size.as_deref())?;

        let mut request = SynthesisRequest::new(query.text);
        request.speaker = Some(query.speaker.into());
        request.language = query.language.into();
        if !query.instruct.trim().is_empty() {
            request.instruct = Some(query.instruct.into());
        }
        let request = request.normalize(mode)?;

        let result = state.coordinator.synthesize(&variant, &request).await?;
        record_synthesis(&state, &result);

        let elapsed = result.elapsed;
        let wav = encode_wav(&result.merged()?)?;
        Ok::<_, ApiError>(wav_response(wav, elapsed))
    }
    .await;

    state.metrics.tts.record_request(started.elapsed());
    if outcome.is_err() {
        state.metrics.tts.record_error();
    }
    outcome
}

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub model_size: Option<String>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_streaming() -> bool {
    true
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("error").data("JSON encoding failed"))
}

/// `POST /tts/voice_clone/sse`: voice clone delivered as `meta`, `audio`...,
/// then `done` or `error`. Request validation failures are plain HTTP errors;
/// anything after the stream opened arrives as an `error` event.
pub async fn voice_clone_sse(
    State(state): State<AppState>,
    query: Result<Query<SseQuery>, QueryRejection>,
    payload: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let mode = VoiceMode::VoiceClone;
    let prepared: Result<(SseQuery, String, NormalizedRequest), ApiError> = (|| {
        let query = query_params(query)?;
        let variant = resolve_variant(mode, query.model_size.as_deref())?;
        let request = json_body(payload)?.normalize(mode)?;
        Ok((query, variant, request))
    })();
    let (query, variant, request) = prepared.inspect_err(|_| state.metrics.stream.record_error())?;

    info!(variant = %variant, streaming = query.streaming, "Opening synthesis stream");

    let (mut session, rx) = StreamSession::channel(SSE_BUFFER);
    let coordinator = state.coordinator.clone();
    let metrics = state.metrics.stream.clone();
    let streaming = query.streaming;
    tokio::spawn(async move {
        let started = Instant::now();
        if let Err(e) = run_session(&coordinator, &variant, &request, streaming, &mut session).await {
            warn!(variant = %variant, "Stream session misuse: {e}");
        }
        metrics.record_request(started.elapsed());
        if session.state() != SessionState::Done {
            metrics.record_error();
        }
        if session.is_detached() {
            info!(variant = %variant, "Client disconnected before the stream finished");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")))
}

pub(crate) fn seconds_header(d: Duration) -> String {
    format!("{:.3}", format_secs(d))
}
