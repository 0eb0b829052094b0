//! Client for the voice assistant backend.
//!
//! [`pipeline`] wraps every HTTP call with cache-busting, retry and error classification;
//! [`sequencer`] plays returned audio clips one after another; [`api`] exposes the backend
//! endpoints as typed async methods.

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sequencer;

pub use api::{AutoPlay, VoiceApi};
pub use config::{ClientConfig, RetryPolicy};
pub use error::{ErrorKind, RequestError};
pub use pipeline::{RequestDescriptor, RequestPipeline};
pub use sequencer::{
    AudioPlayer, PlaybackError, PlaybackItem, PlaybackSequencer, PlaybackState, SequenceReport,
    spawn_sequence,
};
pub use voice_api_types as types;
