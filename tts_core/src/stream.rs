//! Incremental delivery of one request as an ordered event stream.
//!
//! A [`StreamSession`] is a small state machine in front of an mpsc channel:
//!
//! ```text
//! Idle --meta--> MetaSent --audio--> AudioSent --audio--> AudioSent
//!                   |                    |
//!                   +--error--> Failed   +--done/error--> Done | Failed
//! ```
//!
//! Every transition is checked before anything is pushed, so `audio` can never
//! precede `meta` and a session emits exactly one terminal event. When the
//! receiving side goes away the session detaches and drops further events.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::assemble::Waveform;
use crate::coordinator::{sentence_failure, Coordinator};
use crate::encode::format_secs;
use crate::error::{Result, TtsError};
use crate::request::NormalizedRequest;
use crate::segment::segment;
use crate::wav::encode_wav_base64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    MetaSent,
    AudioSent,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot emit '{event}' while session is {state:?}")]
    InvalidTransition {
        event: &'static str,
        state: SessionState,
    },

    #[error("session already terminated")]
    Terminated,
}

/// One SSE message. The event name comes from [`StreamEvent::name`]; the
/// variant's fields are the JSON data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Meta {
        status: &'static str,
        text: String,
    },
    Audio {
        chunk_index: usize,
        audio: String,
        sample_rate: u32,
        generation_time: f64,
    },
    Done {
        total_time: f64,
        total_chunks: usize,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Meta { .. } => "meta",
            StreamEvent::Audio { .. } => "audio",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

pub struct StreamSession {
    tx: mpsc::Sender<StreamEvent>,
    state: SessionState,
    chunks_sent: usize,
    detached: bool,
}

impl StreamSession {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            state: SessionState::Idle,
            chunks_sent: 0,
            detached: false,
        }
    }

    /// Session plus the receiving half, with room for `capacity` unread events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// The receiver was dropped; events are being discarded.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub async fn meta(&mut self, text: &str) -> std::result::Result<(), SessionError> {
        self.advance("meta", SessionState::MetaSent)?;
        self.push(StreamEvent::Meta {
            status: "generating",
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    /// Encode `waveform` as base64 WAV and emit it as the next chunk.
    pub async fn audio(&mut self, waveform: &Waveform, generation_time: Duration) -> Result<()> {
        self.advance("audio", SessionState::AudioSent)?;
        let chunk_index = self.chunks_sent;
        self.chunks_sent += 1;
        if self.detached {
            return Ok(());
        }
        let audio = encode_wav_base64(waveform)?;
        self.push(StreamEvent::Audio {
            chunk_index,
            audio,
            sample_rate: waveform.sample_rate,
            generation_time: format_secs(generation_time),
        })
        .await;
        Ok(())
    }

    pub async fn done(&mut self, total_time: Duration) -> std::result::Result<(), SessionError> {
        self.advance("done", SessionState::Done)?;
        self.push(StreamEvent::Done {
            total_time: format_secs(total_time),
            total_chunks: self.chunks_sent,
        })
        .await;
        Ok(())
    }

    pub async fn fail(&mut self, error: impl Into<String>) -> std::result::Result<(), SessionError> {
        self.advance("error", SessionState::Failed)?;
        self.push(StreamEvent::Error { error: error.into() }).await;
        Ok(())
    }

    fn advance(&mut self, event: &'static str, next: SessionState) -> std::result::Result<(), SessionError> {
        use SessionState::*;

        if self.state.is_terminal() {
            return Err(SessionError::Terminated);
        }
        let allowed = match (self.state, next) {
            (Idle, MetaSent) => true,
            (MetaSent | AudioSent, AudioSent) => true,
            (AudioSent, Done) => true,
            (MetaSent | AudioSent, Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(SessionError::InvalidTransition {
                event,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }

    async fn push(&mut self, event: StreamEvent) {
        if self.detached {
            return;
        }
        let name = event.name();
        if self.tx.send(event).await.is_err() {
            debug!(event = name, "Stream receiver dropped, discarding further events");
            self.detached = true;
        }
    }
}

/// Generate the first text item of `request` into `session`.
///
/// With `streaming` the whole text goes to the model in one streaming-mode call
/// and yields a single `audio` event. Otherwise the text is segmented and each
/// sentence is emitted as soon as it is ready. Failures end the session with an
/// `error` event; the session always ends in a terminal state.
pub async fn run_session(
    coordinator: &Coordinator,
    variant: &str,
    request: &NormalizedRequest,
    streaming: bool,
    session: &mut StreamSession,
) -> std::result::Result<(), SessionError> {
    let text = request.items.first().map(|item| item.text.as_str()).unwrap_or_default();
    session.meta(text).await?;
    let started = Instant::now();

    match drive(coordinator, variant, request, streaming, session).await {
        Ok(()) if session.state() == SessionState::AudioSent => {
            let total = started.elapsed();
            info!(
                variant = %variant,
                chunks = session.chunks_sent(),
                total_s = total.as_secs_f64(),
                "Stream complete"
            );
            session.done(total).await
        }
        Ok(()) => session.fail("No audio generated").await,
        Err(e) => {
            warn!(variant = %variant, "Stream failed: {e}");
            session.fail(e.to_string()).await
        }
    }
}

async fn drive(
    coordinator: &Coordinator,
    variant: &str,
    request: &NormalizedRequest,
    streaming: bool,
    session: &mut StreamSession,
) -> Result<()> {
    let item = request.items.first().ok_or(TtsError::EmptyOutput)?;
    let model = coordinator.registry().resolve(variant).await?;

    if streaming {
        model.synchronize().await;
        let t0 = Instant::now();
        let waveform = coordinator.generate_one(&model, request, item, &item.text, false).await?;
        model.synchronize().await;
        return session.audio(&waveform, t0.elapsed()).await;
    }

    let sentences = segment(&item.text, request.split);
    let total = sentences.len();
    for (index, sentence) in sentences.iter().enumerate() {
        if session.is_detached() {
            debug!(index, total, "Client gone, not starting further sentences");
            break;
        }
        model.synchronize().await;
        let t0 = Instant::now();
        let waveform = coordinator
            .generate_one(&model, request, item, sentence, true)
            .await
            .map_err(|e| sentence_failure(e, index, total))?;
        model.synchronize().await;
        session.audio(&waveform, t0.elapsed()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelCatalog, VariantSpec};
    use crate::model::{GenerationInput, ModelHandle, ModelLoader, ModelOutput, SpeechModel};
    use crate::registry::ModelRegistry;
    use crate::request::{SynthesisRequest, VoiceMode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn wave() -> Waveform {
        Waveform::mono(vec![0.1; 240], 24_000)
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_happy_path_order() {
        let (mut session, rx) = StreamSession::channel(8);
        session.meta("Hello").await.unwrap();
        session.audio(&wave(), Duration::from_millis(1234)).await.unwrap();
        session.audio(&wave(), Duration::from_millis(10)).await.unwrap();
        session.done(Duration::from_millis(1500)).await.unwrap();
        drop(session);

        let events = drain(rx).await;
        let names: Vec<_> = events.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["meta", "audio", "audio", "done"]);
        match &events[1] {
            StreamEvent::Audio {
                chunk_index,
                sample_rate,
                generation_time,
                ..
            } => {
                assert_eq!(*chunk_index, 0);
                assert_eq!(*sample_rate, 24_000);
                assert_eq!(*generation_time, 1.234);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events[3],
            StreamEvent::Done {
                total_time: 1.5,
                total_chunks: 2
            }
        );
    }

    #[tokio::test]
    async fn test_audio_before_meta_is_rejected() {
        let (mut session, _rx) = StreamSession::channel(4);
        let err = session.audio(&wave(), Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::TtsError::Stream(SessionError::InvalidTransition { event: "audio", .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_done_requires_audio() {
        let (mut session, _rx) = StreamSession::channel(4);
        session.meta("x").await.unwrap();
        assert!(session.done(Duration::ZERO).await.is_err());
        session.fail("boom").await.unwrap();
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let (mut session, rx) = StreamSession::channel(8);
        session.meta("x").await.unwrap();
        session.audio(&wave(), Duration::ZERO).await.unwrap();
        session.done(Duration::ZERO).await.unwrap();
        assert_eq!(session.fail("late").await, Err(SessionError::Terminated));
        assert_eq!(session.done(Duration::ZERO).await, Err(SessionError::Terminated));
        drop(session);

        let terminals = drain(rx).await.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_detaches_silently() {
        let (mut session, rx) = StreamSession::channel(1);
        drop(rx);
        session.meta("x").await.unwrap();
        assert!(session.is_detached());
        session.audio(&wave(), Duration::ZERO).await.unwrap();
        session.done(Duration::ZERO).await.unwrap();
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn test_event_json_shape() {
        let meta = serde_json::to_value(StreamEvent::Meta {
            status: "generating",
            text: "hi".into(),
        })
        .unwrap();
        assert_eq!(meta, json!({"status": "generating", "text": "hi"}));

        let err = serde_json::to_value(StreamEvent::Error { error: "bad".into() }).unwrap();
        assert_eq!(err, json!({"error": "bad"}));
    }

    /// Counts calls; sentences containing "FAIL" error out.
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechModel for Counting {
        fn variant(&self) -> &str {
            "base_0.6b"
        }

        async fn generate(&self, input: &GenerationInput) -> anyhow::Result<ModelOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input.texts[0].contains("FAIL") {
                anyhow::bail!("decoder diverged");
            }
            Ok(ModelOutput {
                waveforms: vec![vec![0.0; 100]],
                sample_rate: 24_000,
            })
        }
    }

    struct Fixed(Arc<Counting>);

    #[async_trait]
    impl ModelLoader for Fixed {
        async fn load(&self, _spec: &VariantSpec) -> anyhow::Result<ModelHandle> {
            Ok(self.0.clone())
        }
    }

    fn coordinator() -> (Coordinator, Arc<Counting>) {
        let model = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let registry = ModelRegistry::new(ModelCatalog::builtin("/models"), Arc::new(Fixed(model.clone())));
        (Coordinator::new(Arc::new(registry)), model)
    }

    fn request(text: &str) -> NormalizedRequest {
        let req: SynthesisRequest =
            serde_json::from_value(json!({"text": text, "ref_audio": "ref.wav", "ref_text": "hi"})).unwrap();
        req.normalize(VoiceMode::VoiceClone).unwrap()
    }

    #[tokio::test]
    async fn test_sentence_mode_emits_one_audio_per_sentence() {
        let (coordinator, model) = coordinator();
        let (mut session, rx) = StreamSession::channel(16);
        run_session(&coordinator, "base_0.6b", &request("One. Two! Three?"), false, &mut session)
            .await
            .unwrap();
        drop(session);

        let names: Vec<_> = drain(rx).await.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["meta", "audio", "audio", "audio", "done"]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_streaming_mode_is_single_call() {
        let (coordinator, model) = coordinator();
        let (mut session, rx) = StreamSession::channel(16);
        run_session(&coordinator, "base_0.6b", &request("One. Two."), true, &mut session)
            .await
            .unwrap();
        drop(session);

        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], StreamEvent::Done { total_chunks: 1, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_mid_stream_ends_with_error() {
        let (coordinator, _) = coordinator();
        let (mut session, rx) = StreamSession::channel(16);
        run_session(&coordinator, "base_0.6b", &request("Fine. FAIL here. Never"), false, &mut session)
            .await
            .unwrap();
        drop(session);

        let events = drain(rx).await;
        let names: Vec<_> = events.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["meta", "audio", "error"]);
        match events.last() {
            Some(StreamEvent::Error { error }) => assert!(error.contains("sentence 1 of 3")),
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_variant_after_meta() {
        let (coordinator, model) = coordinator();
        let (mut session, rx) = StreamSession::channel(16);
        run_session(&coordinator, "base_9b", &request("Hi"), true, &mut session)
            .await
            .unwrap();
        drop(session);

        let names: Vec<_> = drain(rx).await.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["meta", "error"]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_stops_further_sentences() {
        let (coordinator, model) = coordinator();
        let (mut session, rx) = StreamSession::channel(1);
        drop(rx);
        run_session(&coordinator, "base_0.6b", &request("A. B. C. D"), false, &mut session)
            .await
            .unwrap();

        assert!(session.state().is_terminal());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
