use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Voice used by the direct chat endpoint when the caller does not pick one.
pub const DEFAULT_DIRECT_VOICE: &str = "longxiang";

/// Backend health payload returned by `GET /status`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemStatus {
    /// Coarse state label, e.g. `running`.
    #[serde(default)]
    pub status: String,
    /// Server-local wall clock at the time of the request.
    pub time: Option<String>,
    /// Backend version string.
    pub version: Option<String>,
    /// Any additional fields the backend chose to report.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A selectable assistant persona.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDescriptor {
    /// Stable role id used by `/role/set`, `/chat` and `/voice/speak`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Speech synthesis voice bound to the role.
    pub voice: Option<String>,
    /// Backend character id, when the role is backed by an agent character.
    pub character_id: Option<String>,
}

/// Payload of `GET /roles`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolesResponse {
    #[serde(default)]
    pub roles: Vec<RoleDescriptor>,
}

/// Body of `POST /role/set`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetRoleRequest {
    pub role_id: String,
}

/// Generic acknowledgement returned by control endpoints.
///
/// `message` is free-form: some endpoints return a string, others echo a structured
/// result from the dialogue manager.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Acknowledgement {
    pub status: Option<String>,
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Acknowledgement {
    /// `true` when the backend reported `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Body of `POST /chat`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub text: String,
    pub role_id: Option<String>,
    /// Always `false` from this client; streaming replies are not consumed.
    pub stream: bool,
}

/// Payload of `POST /chat`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Assistant reply text.
    pub response: Option<String>,
    /// Synthesized reply audio, in playback order.
    #[serde(default, alias = "audio_paths")]
    pub audio_urls: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatResponse {
    /// Audio locators attached to the reply (empty when none were returned).
    pub fn audio_urls(&self) -> &[String] {
        self.audio_urls.as_deref().unwrap_or_default()
    }
}

/// Body of `POST /voice/recognize` and `POST /direct-recognize`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognizeRequest {
    /// Base64-encoded audio.
    pub audio_data: String,
}

/// Payload of the recognition endpoints.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecognitionResult {
    pub status: Option<String>,
    /// Text recognized by the low-latency endpoint.
    pub recognized_text: Option<String>,
    /// Recognizer state reported by `/voice/recognize`.
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /voice/speak`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeakRequest {
    pub text: String,
    pub role_id: Option<String>,
}

/// Payload of `POST /voice/speak`.
///
/// The backend names the field `audio_paths`; `audio_urls` is accepted as well.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SpeechResponse {
    pub status: Option<String>,
    #[serde(default, alias = "audio_paths")]
    pub audio_urls: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SpeechResponse {
    /// Audio locators produced by synthesis (empty when none were returned).
    pub fn audio_urls(&self) -> &[String] {
        self.audio_urls.as_deref().unwrap_or_default()
    }
}

/// Body of `POST /direct-chat`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectChatRequest {
    pub text: String,
    pub stream: bool,
    pub voice: String,
}

/// Payload of `POST /direct-chat`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectChatResponse {
    pub response: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
