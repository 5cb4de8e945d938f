//! Request orchestration for Qwen3-TTS style speech synthesis.
//!
//! Requests are normalized into [`NormalizedRequest`]s, routed to a lazily loaded
//! model variant through the [`ModelRegistry`], generated by the [`Coordinator`]
//! (sentence by sentence when segmentation applies) and finally encoded as WAV or
//! a JSON envelope, or pushed through a [`StreamSession`].

pub mod assemble;
pub mod backend;
pub mod catalog;
pub mod coordinator;
pub mod encode;
pub mod error;
pub mod model;
pub mod params;
#[cfg(feature = "piper")]
pub mod piper;
pub mod registry;
pub mod remote;
pub mod request;
pub mod segment;
pub mod stream;
pub mod wav;

pub use assemble::{assemble, AudioChunk, Waveform};
pub use backend::BackendLoader;
pub use catalog::{variant_key, Backend, ModelCatalog, ModelFamily, VariantSpec};
pub use coordinator::{Coordinator, SynthesisResult};
pub use encode::{encode, AudioEnvelope, DeliveryMode, EncodedResponse};
pub use error::{Result, TtsError};
pub use model::{GenerationInput, ModelHandle, ModelLoader, ModelOutput, SpeechModel};
pub use params::GenerationParams;
pub use registry::ModelRegistry;
pub use remote::RemoteLoader;
pub use request::{NormalizedRequest, SynthesisRequest, VoiceMode, VoicePrompt};
pub use segment::{segment, SplitMode};
pub use stream::{run_session, SessionError, SessionState, StreamEvent, StreamSession};
