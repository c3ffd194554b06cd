//! Shared in-memory collaborators for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use mailscribe::adapters::{
    AudioInput, MailSender, Mailbox, MailboxError, TranscribeError, Transcriber,
};
use mailscribe::core::{
    CheckpointStore, Collaborators, Journal, MemoryCheckpointStore, ServiceContext,
    ServiceSettings,
};
use mailscribe::domain::{
    CandidateMessage, ChangeKind, ChangeRecord, Cursor, Header, HistoryPage, MessagePart,
};

pub const MAILBOX: &str = "me@example.com";
pub const ALLOWED_SENDER: &str = "voicemail@carrier.example";
pub const RECIPIENT: &str = "inbox@example.com";

#[derive(Default)]
struct MailboxState {
    pages: Vec<(Vec<ChangeRecord>, Option<Cursor>)>,
    messages: HashMap<String, CandidateMessage>,
    attachments: HashMap<String, String>,
    expired_before: Option<Cursor>,
    tip: Cursor,
    failing_messages: HashSet<String>,
    history_calls: Vec<(Cursor, Option<String>)>,
    read: Vec<String>,
}

/// Scripted mailbox: pages are served in order, filtered to those whose
/// high-water cursor is above the requested start.
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    message_fetches: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tip(self, tip: u64) -> Self {
        self.state.lock().unwrap().tip = Cursor::new(tip);
        self
    }

    /// Append a page of "message added" records
    pub fn page(self, message_ids: &[&str], history_id: u64) -> Self {
        let records = message_ids
            .iter()
            .map(|id| ChangeRecord::message_added(*id))
            .collect();
        self.page_records(records, Some(history_id))
    }

    pub fn page_records(self, records: Vec<ChangeRecord>, history_id: Option<u64>) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .push((records, history_id.map(Cursor::new)));
        self
    }

    /// Register a message with attachments given as (filename, bytes)
    pub fn message(self, id: &str, from: &str, subject: &str, attachments: &[(&str, &[u8])]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut parts = vec![MessagePart {
                part_id: "0".to_string(),
                mime_type: "text/plain".to_string(),
                ..Default::default()
            }];
            for (i, (filename, bytes)) in attachments.iter().enumerate() {
                let attachment_id = format!("att-{}-{}", id, i);
                state
                    .attachments
                    .insert(attachment_id.clone(), URL_SAFE_NO_PAD.encode(bytes));
                parts.push(MessagePart {
                    part_id: (i + 1).to_string(),
                    mime_type: "audio/wav".to_string(),
                    filename: filename.to_string(),
                    attachment_id: Some(attachment_id),
                    parts: Vec::new(),
                });
            }
            state.messages.insert(
                id.to_string(),
                CandidateMessage {
                    id: id.to_string(),
                    history_id: None,
                    headers: vec![
                        Header {
                            name: "From".to_string(),
                            value: from.to_string(),
                        },
                        Header {
                            name: "Subject".to_string(),
                            value: subject.to_string(),
                        },
                    ],
                    parts,
                },
            );
        }
        self
    }

    /// Replace an attachment's payload with undecodable data
    pub fn corrupt_attachment(self, message_id: &str, index: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .attachments
            .insert(format!("att-{}-{}", message_id, index), "!!not base64!!".to_string());
        self
    }

    pub fn failing_message(self, message_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_messages
            .insert(message_id.to_string());
        self
    }

    /// Starting cursors below `cursor` are reported as expired
    pub fn expire_before(self, cursor: u64) -> Self {
        self.state.lock().unwrap().expired_before = Some(Cursor::new(cursor));
        self
    }

    pub fn history_calls(&self) -> Vec<(Cursor, Option<String>)> {
        self.state.lock().unwrap().history_calls.clone()
    }

    pub fn read_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().read.clone()
    }

    pub fn message_fetches(&self) -> usize {
        self.message_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    fn identity(&self) -> &str {
        MAILBOX
    }

    async fn list_history(
        &self,
        start: Cursor,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, MailboxError> {
        let mut state = self.state.lock().unwrap();
        state
            .history_calls
            .push((start, page_token.map(str::to_string)));

        if state.expired_before.is_some_and(|limit| start < limit) {
            return Err(MailboxError::CursorExpired(start));
        }

        let visible: Vec<_> = state
            .pages
            .iter()
            .filter(|(_, high_water)| high_water.map_or(true, |h| h > start))
            .cloned()
            .collect();
        let index = page_token
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);

        let Some((records, history_id)) = visible.get(index).cloned() else {
            return Ok(HistoryPage::default());
        };
        let next_page_token = (index + 1 < visible.len()).then(|| format!("page-{}", index + 1));

        Ok(HistoryPage {
            records,
            next_page_token,
            history_id,
        })
    }

    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, MailboxError> {
        self.message_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(message_id) {
            return Err(MailboxError::Transport("connection reset".to_string()));
        }
        state
            .messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(message_id.to_string()))
    }

    async fn get_attachment(
        &self,
        _message_id: &str,
        attachment_id: &str,
    ) -> Result<String, MailboxError> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(attachment_id.to_string()))
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.state.lock().unwrap().read.push(message_id.to_string());
        Ok(())
    }

    async fn latest_cursor(&self) -> Result<Cursor, MailboxError> {
        Ok(self.state.lock().unwrap().tip)
    }
}

/// Records every call; behaviour is configurable
#[derive(Default)]
pub struct FakeTranscriber {
    transcript: Mutex<String>,
    delay: Option<Duration>,
    fail: bool,
    calls: Mutex<Vec<Vec<u8>>>,
}

impl FakeTranscriber {
    pub fn returning(transcript: &str) -> Self {
        Self {
            transcript: Mutex::new(transcript.to_string()),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::returning("")
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn stalled(delay: Duration) -> Self {
        Self {
            transcript: Mutex::new("too late".to_string()),
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String, TranscribeError> {
        self.calls.lock().unwrap().push(audio.bytes.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(TranscribeError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        let text = self.transcript.lock().unwrap().trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::EmptyTranscript);
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Fully wired context over fakes
pub struct Harness {
    pub mailbox: Arc<FakeMailbox>,
    pub transcriber: Arc<FakeTranscriber>,
    pub sender: Arc<RecordingSender>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub context: Arc<ServiceContext>,
}

impl Harness {
    pub fn new(
        mailbox: FakeMailbox,
        transcriber: FakeTranscriber,
        checkpoints: MemoryCheckpointStore,
        download_dir: &Path,
    ) -> Self {
        Self::with_settings(mailbox, transcriber, checkpoints, settings(download_dir))
    }

    pub fn with_settings(
        mailbox: FakeMailbox,
        transcriber: FakeTranscriber,
        checkpoints: MemoryCheckpointStore,
        settings: ServiceSettings,
    ) -> Self {
        let mailbox = Arc::new(mailbox);
        let transcriber = Arc::new(transcriber);
        let sender = Arc::new(RecordingSender::default());
        let checkpoints = Arc::new(checkpoints);

        let context = Arc::new(ServiceContext::new(
            Collaborators {
                mailbox: mailbox.clone(),
                sender: sender.clone(),
                transcriber: transcriber.clone(),
                checkpoints: checkpoints.clone(),
                journal: Arc::new(Journal::disabled()),
            },
            settings,
        ));

        Self {
            mailbox,
            transcriber,
            sender,
            checkpoints,
            context,
        }
    }

    pub async fn stored_cursor(&self) -> Option<Cursor> {
        self.checkpoints.load().await.ok()
    }
}

pub fn settings(download_dir: &Path) -> ServiceSettings {
    let mut settings = ServiceSettings::new(ALLOWED_SENDER, RECIPIENT);
    settings.download_dir = download_dir.to_path_buf();
    settings
}

/// Push envelope body for a notification
pub fn envelope(email_address: &str, history_id: u64) -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;

    let payload = serde_json::json!({
        "emailAddress": email_address,
        "historyId": history_id,
    });
    serde_json::json!({
        "message": {
            "data": STANDARD.encode(payload.to_string()),
            "messageId": "1",
        },
        "subscription": "projects/demo/subscriptions/mail",
    })
    .to_string()
    .into_bytes()
}

/// Files remaining in a directory
pub fn files_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

pub fn label_change(message_id: &str) -> ChangeRecord {
    ChangeRecord {
        kind: ChangeKind::LabelAdded,
        message_id: message_id.to_string(),
    }
}
