//! Deepgram transcription adapter.
//!
//! Posts raw audio to the `listen` endpoint and takes the first
//! alternative of the first channel as the transcript.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AudioInput, TranscribeError, Transcriber};

pub const DEFAULT_ENDPOINT: &str = "https://api.deepgram.com/v1/listen";

/// Request options for Deepgram
#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    pub endpoint: String,
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub request_timeout: Duration,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            smart_format: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    results: Option<ListenResults>,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Deepgram HTTP client
pub struct DeepgramTranscriber {
    api_key: String,
    config: DeepgramConfig,
    client: reqwest::Client,
}

impl DeepgramTranscriber {
    pub fn new(api_key: impl Into<String>, config: DeepgramConfig) -> Result<Self, TranscribeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TranscribeError::Transport(e.to_string()))?;

        Ok(Self {
            api_key: api_key.into().trim().to_string(),
            config,
            client,
        })
    }

    fn query(&self) -> [(&'static str, String); 3] {
        [
            ("language", self.config.language.clone()),
            ("model", self.config.model.clone()),
            ("smart_format", self.config.smart_format.to_string()),
        ]
    }
}

/// First alternative of the first channel, trimmed; blank is an error
fn first_transcript(body: &[u8]) -> Result<String, TranscribeError> {
    let parsed: ListenResponse =
        serde_json::from_slice(body).map_err(|e| TranscribeError::Malformed(e.to_string()))?;

    let text = parsed
        .results
        .and_then(|r| r.channels.into_iter().next())
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(TranscribeError::EmptyTranscript);
    }
    Ok(text)
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    fn name(&self) -> &str {
        "deepgram"
    }

    #[instrument(skip(self, audio), fields(bytes = audio.bytes.len()))]
    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String, TranscribeError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&self.query())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", audio.content_type)
            .body(audio.bytes.to_vec())
            .send()
            .await
            .map_err(|e| TranscribeError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TranscribeError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(TranscribeError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let transcript = first_transcript(&body)?;
        debug!(chars = transcript.len(), "Transcription received");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_transcript() {
        let body = br#"{"results":{"channels":[{"alternatives":[{"transcript":" Hi, call me back. "},{"transcript":"other"}]}]}}"#;
        assert_eq!(first_transcript(body).unwrap(), "Hi, call me back.");
    }

    #[test]
    fn test_missing_or_blank_transcript_is_empty() {
        for body in [
            br#"{"results":{"channels":[]}}"#.as_slice(),
            br#"{"results":{"channels":[{"alternatives":[]}]}}"#.as_slice(),
            br#"{"results":{"channels":[{"alternatives":[{"transcript":"  "}]}]}}"#.as_slice(),
            br#"{}"#.as_slice(),
        ] {
            assert!(matches!(
                first_transcript(body),
                Err(TranscribeError::EmptyTranscript)
            ));
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            first_transcript(b"<html>"),
            Err(TranscribeError::Malformed(_))
        ));
    }
}
