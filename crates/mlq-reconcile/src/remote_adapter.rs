//! Remote Adapter: deserialize the marketplace question resource and normalize
//! it to [`RemoteQuestion`].
//!
//! # Design constraints
//! - Pure, deterministic conversion. No IO, no async.
//! - Unknown JSON fields are ignored so additions on the marketplace side do
//!   not break decoding.
//! - An answer with non-empty text wins over whatever the status string says.
//! - Unrecognised status strings are errors; the caller treats them as a
//!   transient failure rather than guessing.
//! - An unreadable answer timestamp is dropped with a warning, like a missing
//!   one; the answer itself still counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{RemoteQuestion, RemoteState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAdapterError {
    MissingStatus {
        question_id: String,
    },
    UnknownStatus {
        question_id: String,
        raw: String,
    },
    /// Status says ANSWERED but no answer text came with it.
    AnsweredWithoutText {
        question_id: String,
    },
    InvalidTimestamp {
        question_id: String,
        field: &'static str,
        raw: String,
    },
}

impl std::fmt::Display for RemoteAdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingStatus { question_id } => {
                write!(f, "marketplace question '{question_id}' has empty status")
            }
            Self::UnknownStatus { question_id, raw } => write!(
                f,
                "marketplace question '{question_id}' has unrecognised status '{raw}'"
            ),
            Self::AnsweredWithoutText { question_id } => write!(
                f,
                "marketplace question '{question_id}' is ANSWERED but carries no answer text"
            ),
            Self::InvalidTimestamp {
                question_id,
                field,
                raw,
            } => write!(
                f,
                "marketplace question '{question_id}' has unparseable {field} '{raw}'"
            ),
        }
    }
}

impl std::error::Error for RemoteAdapterError {}

// ---------------------------------------------------------------------------
// Raw wire-level structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnswer {
    #[serde(default)]
    pub text: Option<String>,
    /// RFC 3339. Older payloads call it `timestamp`.
    #[serde(default, alias = "timestamp")]
    pub date_created: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /questions/{id}` response body, reduced to what reconciliation reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuestionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub answer: Option<RawAnswer>,
    #[serde(default, alias = "dateClosed")]
    pub date_closed: Option<String>,
}

impl RawQuestionResponse {
    pub fn open(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Self::default()
        }
    }

    pub fn answered(text: &str, date_created: &str) -> Self {
        Self {
            status: "ANSWERED".to_string(),
            answer: Some(RawAnswer {
                text: Some(text.to_string()),
                date_created: Some(date_created.to_string()),
                status: Some("ACTIVE".to_string()),
            }),
            date_closed: None,
        }
    }

    pub fn closed(status: &str, date_closed: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            answer: None,
            date_closed: date_closed.map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

enum StatusClass {
    Open,
    Answered,
    Closed,
}

fn classify_status(question_id: &str, raw: &str) -> Result<StatusClass, RemoteAdapterError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "" => Err(RemoteAdapterError::MissingStatus {
            question_id: question_id.to_string(),
        }),
        "UNANSWERED" | "UNDER_REVIEW" => Ok(StatusClass::Open),
        "ANSWERED" => Ok(StatusClass::Answered),
        "CLOSED_UNANSWERED" | "CLOSED" | "EXPIRED" | "DELETED" | "BANNED" | "DISABLED" => {
            Ok(StatusClass::Closed)
        }
        _ => Err(RemoteAdapterError::UnknownStatus {
            question_id: question_id.to_string(),
            raw: raw.to_string(),
        }),
    }
}

fn parse_ts(
    question_id: &str,
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, RemoteAdapterError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| RemoteAdapterError::InvalidTimestamp {
                question_id: question_id.to_string(),
                field,
                raw: s.to_string(),
            }),
    }
}

/// Convert a raw response into the classifier's view of the question.
pub fn normalize(
    marketplace_question_id: &str,
    raw: RawQuestionResponse,
) -> Result<RemoteQuestion, RemoteAdapterError> {
    let qid = marketplace_question_id;

    let answer_text = raw
        .answer
        .as_ref()
        .and_then(|a| a.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let state = if let Some(text) = answer_text {
        let answered_at = match parse_ts(
            qid,
            "answer.date_created",
            raw.answer.as_ref().and_then(|a| a.date_created.as_deref()),
        ) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "answer timestamp unreadable; approval time falls back to now");
                None
            }
        };
        RemoteState::Answered {
            text: text.to_string(),
            answered_at,
        }
    } else {
        let closed_at = parse_ts(qid, "date_closed", raw.date_closed.as_deref())?;
        match classify_status(qid, &raw.status)? {
            StatusClass::Answered => {
                return Err(RemoteAdapterError::AnsweredWithoutText {
                    question_id: qid.to_string(),
                })
            }
            StatusClass::Closed => RemoteState::Closed { closed_at },
            StatusClass::Open if raw.date_closed.is_some() => RemoteState::Closed { closed_at },
            StatusClass::Open => RemoteState::Open,
        }
    };

    Ok(RemoteQuestion {
        marketplace_question_id: qid.to_string(),
        raw_status: raw.status,
        state,
    })
}
