//! ElevenLabs text-to-speech and voice cloning.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::http::{check_status, http_client, optional_env, required_env};

const PROVIDER: &str = "elevenlabs";
const DEFAULT_API_URL: &str = "https://api.elevenlabs.io/v1";
const TTS_MODEL: &str = "eleven_monolingual_v1";
/// 128 kbps MP3; durations are derived from this bitrate.
pub const TTS_OUTPUT_FORMAT: &str = "mp3_44100_128";
pub const TTS_BITRATE_KBPS: u32 = 128;

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: SecretString,
    pub base_url: String,
}

impl ElevenLabsConfig {
    pub fn from_env() -> ClientResult<Self> {
        Ok(Self {
            api_key: SecretString::from(required_env("ELEVEN_LABS_API_KEY")?),
            base_url: optional_env("ELEVENLABS_BASE_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }
}

/// A voice from the ElevenLabs library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<Voice>,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Deserialize)]
struct AddVoiceResponse {
    voice_id: Option<String>,
}

/// One audio sample for voice cloning.
#[derive(Debug, Clone)]
pub struct VoiceSample {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone)]
pub struct ElevenLabsClient {
    http: Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> Self {
        Self {
            http: http_client(Duration::from_secs(120)),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub async fn list_voices(&self) -> ClientResult<Vec<Voice>> {
        let response = self
            .http
            .get(self.url("voices"))
            .header("xi-api-key", self.config.api_key.expose_secret())
            .send()
            .await?;
        let response = checked(response).await?;
        Ok(response.json::<VoicesResponse>().await?.voices)
    }

    /// Synthesize `text` and return MP3 bytes.
    pub async fn text_to_speech(&self, voice_id: &str, text: &str) -> ClientResult<Vec<u8>> {
        debug!(voice_id, input_len = text.len(), "ElevenLabs TTS request");

        let body = TtsRequest {
            text,
            model_id: TTS_MODEL,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        };
        let response = self
            .http
            .post(self.url(&format!("text-to-speech/{}", voice_id)))
            .query(&[("output_format", TTS_OUTPUT_FORMAT)])
            .header("xi-api-key", self.config.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?;
        let response = checked(response).await?;

        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), "ElevenLabs TTS synthesis complete");
        Ok(audio.to_vec())
    }

    /// Clone a voice from audio samples. Returns the new voice id.
    pub async fn add_voice(
        &self,
        name: &str,
        description: &str,
        samples: Vec<VoiceSample>,
    ) -> ClientResult<String> {
        if samples.is_empty() {
            return Err(ClientError::InvalidRequest("No files provided".to_string()));
        }

        let mut form = Form::new()
            .text("name", name.to_string())
            .text("description", description.to_string());
        for sample in samples {
            let part = Part::bytes(sample.data)
                .file_name(sample.file_name)
                .mime_str(&sample.content_type)
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(self.url("voices/add"))
            .header("xi-api-key", self.config.api_key.expose_secret())
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await?;
        let response = checked(response).await?;

        let voice_id = response
            .json::<AddVoiceResponse>()
            .await?
            .voice_id
            .ok_or_else(|| ClientError::invalid_response(PROVIDER, "missing voice_id"))?;
        info!(voice_id = %voice_id, name, "Cloned voice");
        Ok(voice_id)
    }
}

/// ElevenLabs reports exhausted credits as 401 with `quota_exceeded` in the body.
async fn checked(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    match check_status(PROVIDER, response).await {
        Err(ClientError::Unauthorized(body)) if body.contains("quota_exceeded") => {
            Err(ClientError::QuotaExceeded(body))
        }
        other => other,
    }
}
