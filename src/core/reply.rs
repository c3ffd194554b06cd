//! Transcript email composition.

use std::sync::LazyLock;

use regex::Regex;

pub const UNKNOWN_CALLER: &str = "Unknown caller";

const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d+").expect("valid digit run regex"));

/// One whitespace-separated piece of a grouped number: `+44`, `(020)`, `7946-0958`
static NUMBER_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?\(?\d+\)?(?:[.-]\d+)*$").expect("valid number group regex")
});

static TIME_OR_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{1,2}:\d{2}(?::\d{2})?|\d{1,4}[./-]\d{1,2}[./-]\d{1,4})$")
        .expect("valid time/date regex")
});

/// Caller identifier from a voicemail subject line.
///
/// A standalone run of 7-15 digits wins. Otherwise adjacent groups such as
/// `+44 7123 456789` or `(020) 7946-0958` are joined, never across times or
/// dates. Digits only, with a leading `+` kept; [`UNKNOWN_CALLER`] if none.
pub fn caller_id(subject: &str) -> String {
    single_run(subject)
        .or_else(|| grouped_number(subject))
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
}

fn valid_length(digits: &str) -> bool {
    (MIN_DIGITS..=MAX_DIGITS).contains(&digits.trim_start_matches('+').len())
}

/// A digit run not glued to letters or to a neighbouring `12.03`/`10:42` part
fn single_run(subject: &str) -> Option<String> {
    let bytes = subject.as_bytes();
    DIGIT_RUN.find_iter(subject).find_map(|m| {
        let before = subject[..m.start()].chars().next_back();
        let after = subject[m.end()..].chars().next();
        let after_next = bytes.get(m.end() + 1).copied();

        let glued_before =
            before.is_some_and(|c| c.is_alphanumeric() || matches!(c, '.' | ':' | '/'));
        let glued_after = after.is_some_and(|c| {
            c.is_alphanumeric()
                || (matches!(c, '.' | ':' | '/' | '-')
                    && after_next.is_some_and(|b| b.is_ascii_digit()))
        });

        (!glued_before && !glued_after && valid_length(m.as_str()))
            .then(|| m.as_str().to_string())
    })
}

fn digits_of(token: &str) -> String {
    token.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn is_group(token: &str) -> bool {
    NUMBER_GROUP.is_match(token) && !TIME_OR_DATE.is_match(token)
}

/// Join whitespace-separated number groups into the longest valid number
fn grouped_number(subject: &str) -> Option<String> {
    let tokens: Vec<&str> = subject
        .split_whitespace()
        .map(|t| t.trim_end_matches([',', ';', '!', '?']))
        .collect();

    for (i, first) in tokens.iter().enumerate() {
        if !is_group(first) {
            continue;
        }

        let mut digits = digits_of(first);
        let mut best = valid_length(&digits).then(|| digits.clone());
        for next in &tokens[i + 1..] {
            let more = digits_of(next);
            // Continuation groups have at least two digits and no leading +
            if !is_group(next) || next.starts_with('+') || more.len() < 2 {
                break;
            }
            if digits.len() + more.len() > MAX_DIGITS {
                break;
            }
            digits.push_str(&more);
            if valid_length(&digits) {
                best = Some(digits.clone());
            }
        }

        if let Some(number) = best {
            return Some(if first.starts_with('+') {
                format!("+{}", number)
            } else {
                number
            });
        }
    }
    None
}

/// Outbound transcript email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptReply {
    pub subject: String,
    pub body: String,
}

impl TranscriptReply {
    pub fn compose(source_subject: &str, transcript: &str) -> Self {
        let caller = caller_id(source_subject);
        let subject = if source_subject.trim().is_empty() {
            format!("Voicemail Transcription: {}", caller)
        } else {
            format!("Voicemail Transcription: {}", source_subject.trim())
        };

        Self {
            subject,
            body: format!(
                "Transcription of voicemail from: {}\n\n{}\n",
                caller,
                transcript.trim()
            ),
        }
    }
}
