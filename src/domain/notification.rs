//! Push notification envelope and its decoded mailbox-change payload.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use super::Cursor;

/// Errors decoding an inbound push envelope
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Empty request body")]
    EmptyBody,

    #[error("Invalid envelope JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid notification payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

/// Outer push envelope: `{"message": {"data": "<base64>", ...}, "subscription": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,

    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: String,

    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
}

/// Decoded payload: which mailbox changed and a cursor hint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxNotification {
    pub email_address: String,
    pub history_id: Cursor,
}

impl MailboxNotification {
    /// Decode a raw request body into a notification.
    pub fn decode(body: &[u8]) -> Result<Self, NotificationError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(NotificationError::EmptyBody);
        }

        let envelope: PushEnvelope =
            serde_json::from_slice(body).map_err(NotificationError::InvalidJson)?;
        let data = STANDARD.decode(envelope.message.data.trim())?;

        serde_json::from_slice(&data).map_err(NotificationError::InvalidPayload)
    }

    /// Whether this notification concerns the given mailbox address.
    pub fn is_for(&self, address: &str) -> bool {
        self.email_address.eq_ignore_ascii_case(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(data: &str) -> Vec<u8> {
        serde_json::json!({
            "message": { "data": data, "messageId": "123" },
            "subscription": "projects/p/subscriptions/s"
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_decode_valid_envelope() {
        let payload = STANDARD.encode(r#"{"emailAddress":"me@example.com","historyId":4242}"#);
        let n = MailboxNotification::decode(&envelope(&payload)).unwrap();
        assert_eq!(n.email_address, "me@example.com");
        assert_eq!(n.history_id, Cursor::new(4242));
        assert!(n.is_for("ME@example.com"));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = MailboxNotification::decode(&envelope("%%% not base64 %%%")).unwrap_err();
        assert!(matches!(err, NotificationError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_rejects_bad_json_and_payload() {
        assert!(matches!(
            MailboxNotification::decode(b"{not json").unwrap_err(),
            NotificationError::InvalidJson(_)
        ));
        assert!(matches!(
            MailboxNotification::decode(b"  ").unwrap_err(),
            NotificationError::EmptyBody
        ));

        let payload = STANDARD.encode(r#"{"unexpected":true}"#);
        assert!(matches!(
            MailboxNotification::decode(&envelope(&payload)).unwrap_err(),
            NotificationError::InvalidPayload(_)
        ));
    }
}
