//! Delegate for the external NewAvata lip-sync video renderer.
//!
//! The renderer is an opaque HTTP service. [`VideoDelegate::render`] submits a
//! [`VideoJob`] either synchronously (`record`, bounded by a timeout) or to the
//! renderer's queue (`generate`). Whatever the renderer does, the caller gets a
//! [`RenderOutcome`]; only malformed jobs are reported as [`VideoError`].

pub mod delegate;
pub mod error;
pub mod job;

pub use delegate::{RenderOutcome, VideoDelegate};
pub use error::VideoError;
pub use job::{validate_avatar, Quality, RenderMode, VideoJob, AUTO_AVATAR, DEFAULT_ENGINE, DEFAULT_VOICE};
