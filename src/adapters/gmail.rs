//! Gmail REST adapter.
//!
//! Implements [`Mailbox`] and [`MailSender`] over the Gmail v1 API:
//!
//! | Operation         | Endpoint                                              |
//! |-------------------|-------------------------------------------------------|
//! | change log page   | `GET users/{u}/history?startHistoryId=&historyTypes=` |
//! | full message      | `GET users/{u}/messages/{id}?format=full`             |
//! | attachment        | `GET users/{u}/messages/{id}/attachments/{att}`       |
//! | mark read         | `POST users/{u}/messages/{id}/modify`                 |
//! | tip cursor        | `GET users/{u}/messages?maxResults=1` + metadata get  |
//! | send              | `POST users/{u}/messages/send`                        |
//!
//! Access tokens are refreshed from the stored refresh token when they are
//! missing or about to expire.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{MailSender, Mailbox, MailboxError};
use crate::domain::{
    CandidateMessage, ChangeKind, ChangeRecord, Cursor, Header, HistoryPage, MessagePart,
};

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh this long before the reported expiry
const EXPIRY_SLACK_SECS: i64 = 60;

/// OAuth token document as stored in the secret store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GmailToken {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub token_uri: Option<String>,
}

/// OAuth client credentials document: `{"web": {...}}` or `{"installed": {...}}`
#[derive(Debug, Deserialize)]
struct ClientCredentialsFile {
    #[serde(alias = "installed")]
    web: ClientCredentials,
}

#[derive(Debug, Deserialize)]
struct ClientCredentials {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl GmailToken {
    /// Parse the token document
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Fill in client credentials from a separate OAuth client document
    pub fn with_client_credentials(mut self, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let file: ClientCredentialsFile = serde_json::from_slice(bytes)?;
        self.client_id = Some(file.web.client_id);
        self.client_secret = Some(file.web.client_secret);
        if self.token_uri.is_none() {
            self.token_uri = file.web.token_uri;
        }
        Ok(self)
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expiry) {
            (Some(token), Some(expiry)) => {
                !token.is_empty() && expiry - ChronoDuration::seconds(EXPIRY_SLACK_SECS) > now
            }
            (Some(token), None) => !token.is_empty(),
            _ => false,
        }
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryList {
    #[serde(default)]
    history: Vec<WireHistory>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    history_id: Option<Cursor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHistory {
    #[serde(default)]
    messages_added: Vec<WireMessageChange>,
    #[serde(default)]
    messages_deleted: Vec<WireMessageChange>,
    #[serde(default)]
    labels_added: Vec<WireMessageChange>,
    #[serde(default)]
    labels_removed: Vec<WireMessageChange>,
}

#[derive(Debug, Deserialize)]
struct WireMessageChange {
    #[serde(default)]
    message: Option<WireMessageRef>,
}

#[derive(Debug, Deserialize)]
struct WireMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<WireMessageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    #[serde(default)]
    history_id: Option<Cursor>,
    #[serde(default)]
    payload: Option<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    part_id: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<WireBody>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(default)]
    data: String,
}

impl From<WirePart> for MessagePart {
    fn from(part: WirePart) -> Self {
        MessagePart {
            part_id: part.part_id,
            mime_type: part.mime_type,
            filename: part.filename,
            attachment_id: part.body.and_then(|b| b.attachment_id),
            parts: part.parts.into_iter().map(MessagePart::from).collect(),
        }
    }
}

impl From<WireMessage> for CandidateMessage {
    fn from(message: WireMessage) -> Self {
        let payload = message.payload.unwrap_or_default();
        CandidateMessage {
            id: message.id,
            history_id: message.history_id,
            headers: payload.headers,
            parts: payload.parts.into_iter().map(MessagePart::from).collect(),
        }
    }
}

impl From<HistoryList> for HistoryPage {
    fn from(list: HistoryList) -> Self {
        let mut records = Vec::new();
        for entry in list.history {
            let groups = [
                (ChangeKind::MessageAdded, entry.messages_added),
                (ChangeKind::MessageDeleted, entry.messages_deleted),
                (ChangeKind::LabelAdded, entry.labels_added),
                (ChangeKind::LabelRemoved, entry.labels_removed),
            ];
            for (kind, changes) in groups {
                records.extend(changes.into_iter().filter_map(|c| {
                    c.message.map(|m| ChangeRecord {
                        kind,
                        message_id: m.id,
                    })
                }));
            }
        }

        HistoryPage {
            records,
            next_page_token: list.next_page_token,
            history_id: list.history_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Gmail API client for one mailbox
pub struct GmailClient {
    identity: String,
    user: String,
    base_url: String,
    token: Mutex<GmailToken>,
    client: reqwest::Client,
}

impl GmailClient {
    /// Create a client for `user` ("me" for the authorised account).
    ///
    /// Every API and token call is bounded by `request_timeout`.
    pub fn new(
        identity: impl Into<String>,
        user: impl Into<String>,
        token: GmailToken,
        request_timeout: Duration,
    ) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            identity: identity.into(),
            user: user.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: Mutex::new(token),
            client,
        })
    }

    /// Point the client at a different API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build API URL
    fn api_url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/{}/{}", self.base_url, self.user, path)
    }

    /// A valid bearer token, refreshing if needed
    async fn bearer(&self) -> Result<String, MailboxError> {
        let mut token = self.token.lock().await;
        if token.is_fresh(Utc::now()) {
            return Ok(token.access_token.clone().unwrap_or_default());
        }
        if !token.can_refresh() {
            return Err(MailboxError::Permission(
                "access token expired and no refresh credentials available".to_string(),
            ));
        }

        let token_uri = token
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_deref().unwrap_or_default()),
            ("client_id", token.client_id.as_deref().unwrap_or_default()),
            ("client_secret", token.client_secret.as_deref().unwrap_or_default()),
        ];

        let response = self
            .client
            .post(&token_uri)
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let response = check(response).await?;
        let refreshed: RefreshResponse = response.json().await.map_err(malformed)?;

        token.access_token = Some(refreshed.access_token.clone());
        token.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        info!("Refreshed Gmail access token");

        Ok(refreshed.access_token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailboxError> {
        let bearer = self.bearer().await?;
        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(bearer)
            .query(query)
            .send()
            .await
            .map_err(transport)?;

        check(response).await?.json().await.map_err(malformed)
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<(), MailboxError> {
        let bearer = self.bearer().await?;
        let response = self
            .client
            .post(self.api_url(path))
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        check(response).await.map(|_| ())
    }
}

fn transport(e: reqwest::Error) -> MailboxError {
    MailboxError::Transport(e.to_string())
}

fn malformed(e: reqwest::Error) -> MailboxError {
    MailboxError::Malformed(e.to_string())
}

/// Map non-2xx statuses onto the mailbox error taxonomy
async fn check(response: reqwest::Response) -> Result<reqwest::Response, MailboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} {}: {}", status.as_u16(), url, body.trim());

    Err(match status {
        StatusCode::NOT_FOUND => MailboxError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MailboxError::Permission(detail),
        _ => MailboxError::Transport(detail),
    })
}

/// Strip characters that would break out of a header line
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2822 plain-text message
pub fn compose_raw(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n{}",
        header_value(to),
        header_value(subject),
        body
    )
}

#[async_trait]
impl Mailbox for GmailClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    #[instrument(skip(self), fields(start = %start))]
    async fn list_history(
        &self,
        start: Cursor,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, MailboxError> {
        let start_str = start.to_string();
        let mut query = vec![
            ("startHistoryId", start_str.as_str()),
            ("historyTypes", "messageAdded"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        match self.get_json::<HistoryList>("history", &query).await {
            Ok(list) => {
                let page = HistoryPage::from(list);
                debug!(records = page.records.len(), "Fetched history page");
                Ok(page)
            }
            // The history API answers 404 when startHistoryId is too old
            Err(MailboxError::NotFound(_)) => Err(MailboxError::CursorExpired(start)),
            Err(e) => Err(e),
        }
    }

    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, MailboxError> {
        let wire: WireMessage = self
            .get_json(&format!("messages/{}", message_id), &[("format", "full")])
            .await?;
        Ok(CandidateMessage::from(wire))
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<String, MailboxError> {
        let wire: WireAttachment = self
            .get_json(
                &format!("messages/{}/attachments/{}", message_id, attachment_id),
                &[],
            )
            .await?;
        Ok(wire.data)
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.post_json(
            &format!("messages/{}/modify", message_id),
            &serde_json::json!({ "removeLabelIds": ["UNREAD"] }),
        )
        .await
    }

    async fn latest_cursor(&self) -> Result<Cursor, MailboxError> {
        let list: MessageList = self.get_json("messages", &[("maxResults", "1")]).await?;
        let latest = list
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| MailboxError::NotFound("no messages found".to_string()))?;

        let wire: WireMessage = self
            .get_json(
                &format!("messages/{}", latest.id),
                &[("format", "metadata")],
            )
            .await?;

        wire.history_id
            .filter(|c| c.value() != 0)
            .ok_or_else(|| MailboxError::Malformed("history id missing from message".to_string()))
    }
}

#[async_trait]
impl MailSender for GmailClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let raw = URL_SAFE.encode(compose_raw(to, subject, body));
        self.post_json("messages/send", &serde_json::json!({ "raw": raw }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_list_mapping() {
        let json = r#"{
            "history": [
                {"id": "101", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                {"id": "102", "labelsRemoved": [{"message": {"id": "m0"}, "labelIds": ["UNREAD"]}]}
            ],
            "nextPageToken": "tok",
            "historyId": "105"
        }"#;
        let list: HistoryList = serde_json::from_str(json).unwrap();
        let page = HistoryPage::from(list);

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.added_message_ids().collect::<Vec<_>>(), vec!["m1"]);
        assert_eq!(page.history_id, Some(Cursor::new(105)));
        assert!(!page.is_last());
    }

    #[test]
    fn test_message_mapping_keeps_attachment_ids() {
        let json = r#"{
            "id": "m1",
            "historyId": "200",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [{"name": "From", "value": "Phone <noreply@example.com>"}],
                "parts": [
                    {"partId": "0", "mimeType": "text/plain", "filename": "", "body": {"size": 10, "data": "aGk="}},
                    {"partId": "1", "mimeType": "audio/wav", "filename": "voicemail.wav", "body": {"attachmentId": "att-1", "size": 2048}}
                ]
            }
        }"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let message = CandidateMessage::from(wire);

        assert_eq!(message.history_id, Some(Cursor::new(200)));
        assert_eq!(message.header("from"), Some("Phone <noreply@example.com>"));
        let attachments = message.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].attachment_id, "att-1");
    }

    #[test]
    fn test_compose_raw_strips_header_breaks() {
        let raw = compose_raw("ops@example.com", "Hi\r\nBcc: evil@example.com", "body");
        assert!(raw.starts_with("To: ops@example.com\r\nSubject: Hi  Bcc: evil@example.com\r\n"));
        assert!(raw.ends_with("\r\n\r\nbody"));
    }

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        let mut token = GmailToken {
            access_token: Some("abc".to_string()),
            expiry: Some(now + ChronoDuration::seconds(600)),
            ..Default::default()
        };
        assert!(token.is_fresh(now));

        token.expiry = Some(now + ChronoDuration::seconds(30));
        assert!(!token.is_fresh(now));
        assert!(!token.can_refresh());

        let creds = br#"{"web":{"client_id":"id","client_secret":"sec","token_uri":"https://tok"}}"#;
        token.refresh_token = Some("r".to_string());
        let token = token.with_client_credentials(creds).unwrap();
        assert!(token.can_refresh());
        assert_eq!(token.token_uri.as_deref(), Some("https://tok"));
    }
}
