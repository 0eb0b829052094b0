//! Typed endpoint calls on top of [`RequestPipeline`].

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voice_api_types::{
    Acknowledgement, ChatRequest, ChatResponse, DEFAULT_DIRECT_VOICE, DirectChatRequest,
    DirectChatResponse, RecognitionResult, RecognizeRequest, RolesResponse, SetRoleRequest,
    SpeakRequest, SpeechResponse, SystemStatus,
};

use crate::config::ClientConfig;
use crate::error::RequestError;
use crate::pipeline::{RequestDescriptor, RequestPipeline};
use crate::sequencer::{AudioPlayer, PlaybackSequencer, SequenceReport, spawn_sequence};

/// Low-latency endpoints get this much more time than the configured timeout.
const DIRECT_TIMEOUT_FACTOR: f64 = 1.5;

/// A response whose audio, if any, is already playing in the background.
#[derive(Debug)]
pub struct AutoPlay<T> {
    pub response: T,
    /// `None` when the response carried no audio.
    pub playback: Option<JoinHandle<SequenceReport>>,
}

/// Voice assistant backend client.
#[derive(Clone, Debug)]
pub struct VoiceApi {
    pipeline: RequestPipeline,
    cancel: Option<CancellationToken>,
}

impl VoiceApi {
    pub fn new(config: ClientConfig) -> Result<Self, RequestError> {
        Ok(Self::from_pipeline(RequestPipeline::new(config)?))
    }

    pub fn from_pipeline(pipeline: RequestPipeline) -> Self {
        Self {
            pipeline,
            cancel: None,
        }
    }

    /// Every call made through the returned client settles as cancelled once `token` fires,
    /// including calls waiting out a retry backoff.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &ClientConfig {
        self.pipeline.config()
    }

    pub async fn get_status(&self) -> Result<SystemStatus, RequestError> {
        self.send(&RequestDescriptor::get("/status")).await
    }

    pub async fn list_roles(&self) -> Result<RolesResponse, RequestError> {
        self.send(&RequestDescriptor::get("/roles")).await
    }

    pub async fn set_role(&self, role_id: &str) -> Result<Acknowledgement, RequestError> {
        let body = SetRoleRequest {
            role_id: role_id.to_string(),
        };
        self.post("/role/set", &body).await
    }

    pub async fn send_chat_message(
        &self,
        text: &str,
        role_id: Option<&str>,
    ) -> Result<ChatResponse, RequestError> {
        let body = ChatRequest {
            text: text.to_string(),
            role_id: role_id.map(str::to_string),
            stream: false,
        };
        self.post("/chat", &body).await
    }

    /// [`Self::send_chat_message`], then play the reply audio in the background.
    pub async fn send_chat_message_and_play<P: AudioPlayer + 'static>(
        &self,
        text: &str,
        role_id: Option<&str>,
        sequencer: &Arc<PlaybackSequencer<P>>,
    ) -> Result<AutoPlay<ChatResponse>, RequestError> {
        let response = self.send_chat_message(text, role_id).await?;
        let playback = self.autoplay(response.audio_urls(), sequencer);
        Ok(AutoPlay { response, playback })
    }

    /// Submit base64-encoded audio for recognition.
    pub async fn recognize_voice(
        &self,
        audio_data: &str,
    ) -> Result<RecognitionResult, RequestError> {
        let body = RecognizeRequest {
            audio_data: audio_data.to_string(),
        };
        self.post("/voice/recognize", &body).await
    }

    pub async fn stop_recognize_voice(&self) -> Result<Acknowledgement, RequestError> {
        self.post_empty("/voice/recognize/stop").await
    }

    pub async fn start_tts(&self) -> Result<Acknowledgement, RequestError> {
        self.post_empty("/voice/speak/start").await
    }

    pub async fn stop_tts(&self) -> Result<Acknowledgement, RequestError> {
        self.post_empty("/voice/speak/stop").await
    }

    pub async fn synthesize_speech(
        &self,
        text: &str,
        role_id: Option<&str>,
    ) -> Result<SpeechResponse, RequestError> {
        let body = SpeakRequest {
            text: text.to_string(),
            role_id: role_id.map(str::to_string),
        };
        self.post("/voice/speak", &body).await
    }

    /// [`Self::synthesize_speech`], then play the result in the background.
    pub async fn synthesize_speech_and_play<P: AudioPlayer + 'static>(
        &self,
        text: &str,
        role_id: Option<&str>,
        sequencer: &Arc<PlaybackSequencer<P>>,
    ) -> Result<AutoPlay<SpeechResponse>, RequestError> {
        let response = self.synthesize_speech(text, role_id).await?;
        let playback = self.autoplay(response.audio_urls(), sequencer);
        Ok(AutoPlay { response, playback })
    }

    pub async fn interrupt(&self) -> Result<Acknowledgement, RequestError> {
        self.post_empty("/interrupt").await
    }

    /// Low-latency recognition of base64-encoded audio.
    pub async fn direct_recognize(
        &self,
        audio_data: &str,
    ) -> Result<RecognitionResult, RequestError> {
        let request = RequestDescriptor::post("/direct-recognize")
            .json(&RecognizeRequest {
                audio_data: audio_data.to_string(),
            })?
            .timeout(self.direct_timeout());
        self.send(&request).await
    }

    /// Low-latency chat with the default direct voice.
    pub async fn direct_chat(
        &self,
        text: &str,
        stream: bool,
    ) -> Result<DirectChatResponse, RequestError> {
        let request = RequestDescriptor::post("/direct-chat")
            .json(&DirectChatRequest {
                text: text.to_string(),
                stream,
                voice: DEFAULT_DIRECT_VOICE.to_string(),
            })?
            .timeout(self.direct_timeout());
        self.send(&request).await
    }

    /// Resolve backend audio locators into fetchable URLs.
    pub fn resolve_audio_urls<S: AsRef<str>>(&self, locators: &[S]) -> Vec<String> {
        let config = self.config();
        locators
            .iter()
            .map(|l| config.resolve_audio_url(l.as_ref()))
            .collect()
    }

    fn direct_timeout(&self) -> Duration {
        self.config().timeout.mul_f64(DIRECT_TIMEOUT_FACTOR)
    }

    fn autoplay<P: AudioPlayer + 'static>(
        &self,
        locators: &[String],
        sequencer: &Arc<PlaybackSequencer<P>>,
    ) -> Option<JoinHandle<SequenceReport>> {
        if locators.is_empty() {
            return None;
        }
        let urls = self.resolve_audio_urls(locators);
        tracing::debug!(clips = urls.len(), "starting background playback");
        Some(spawn_sequence(Arc::clone(sequencer), urls))
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        let request = RequestDescriptor::post(path).json(body)?;
        self.send(&request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<T, RequestError> {
        self.pipeline.execute(request, self.cancel.as_ref()).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.send(&RequestDescriptor::post(path)).await
    }
}
