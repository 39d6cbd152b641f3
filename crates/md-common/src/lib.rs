use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod logging;

// ============================================================================
// Core Domain Types
// ============================================================================

/// What kind of external interaction a mention was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MentionKind {
    /// A public comment on a post
    Comment,
    /// A direct message
    Message,
    /// A reply we sent, linked back to its parent mention
    Reply,
}

impl std::fmt::Display for MentionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MentionKind::Comment => write!(f, "COMMENT"),
            MentionKind::Message => write!(f, "MESSAGE"),
            MentionKind::Reply => write!(f, "REPLY"),
        }
    }
}

impl MentionKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "COMMENT" => Some(MentionKind::Comment),
            "MESSAGE" => Some(MentionKind::Message),
            "REPLY" => Some(MentionKind::Reply),
            _ => None,
        }
    }
}

/// Triage state of a mention. `None` means untriaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MentionState {
    /// An operator has been assigned
    Assignment,
    /// A reply task has been created and is in flight
    ReplyAttempt,
    /// The upstream acknowledged the reply
    Replied,
    /// The upstream rejected the reply
    ProviderError,
}

impl std::fmt::Display for MentionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MentionState::Assignment => write!(f, "ASSIGNMENT"),
            MentionState::ReplyAttempt => write!(f, "REPLY_ATTEMPT"),
            MentionState::Replied => write!(f, "REPLIED"),
            MentionState::ProviderError => write!(f, "PROVIDER_ERROR"),
        }
    }
}

impl MentionState {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ASSIGNMENT" => Some(MentionState::Assignment),
            "REPLY_ATTEMPT" => Some(MentionState::ReplyAttempt),
            "REPLIED" => Some(MentionState::Replied),
            "PROVIDER_ERROR" => Some(MentionState::ProviderError),
            _ => None,
        }
    }
}

/// A normalized record of an external comment, message, or reply.
///
/// `social_media_platform_ref` is the aggregator's opaque id for the
/// underlying comment and is globally unique; ingestion is idempotent
/// against it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: i64,
    pub content: String,
    pub social_media_platform_ref: String,
    pub social_media_api_post_ref: Option<String>,
    pub platform: String,
    #[serde(rename = "type")]
    pub kind: MentionKind,
    pub state: Option<MentionState>,
    pub disposition: Option<String>,
    pub user_id: Option<i64>,
    /// Parent mention for replies; forms a reply tree
    pub mention_id: Option<i64>,
    /// Opaque payload: `socialMediaPayload`, `taskId`, provider responses
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Outbox Task Types
// ============================================================================

/// Work codes a task row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskCode {
    FetchComments,
    FetchMessages,
    ReplyMention,
    /// Recorded when a duplicate reply attempt was rejected by the store
    ReplyMentionIgnored,
}

impl TaskCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCode::FetchComments => "FETCH_COMMENTS",
            TaskCode::FetchMessages => "FETCH_MESSAGES",
            TaskCode::ReplyMention => "REPLY_MENTION",
            TaskCode::ReplyMentionIgnored => "REPLY_MENTION_IGNORED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FETCH_COMMENTS" => Some(TaskCode::FetchComments),
            "FETCH_MESSAGES" => Some(TaskCode::FetchMessages),
            "REPLY_MENTION" => Some(TaskCode::ReplyMention),
            "REPLY_MENTION_IGNORED" => Some(TaskCode::ReplyMentionIgnored),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbox record. `finished_at IS NULL` means in flight or abandoned;
/// the recovery loops pick those up within their per-code windows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub code: TaskCode,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Mention this task targets, when it carries one (`data.mentionId`).
    pub fn mention_id(&self) -> Option<i64> {
        self.data.get("mentionId").and_then(|v| v.as_i64())
    }

    /// Whether this task records a rejected duplicate rather than real work.
    pub fn is_ignored(&self) -> bool {
        self.data
            .get("isIgnored")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// ============================================================================
// Audit Trail
// ============================================================================

/// Events recorded on the append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    Assignment,
    ReplyAttempt,
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEvent::Assignment => write!(f, "ASSIGNMENT"),
            AuditEvent::ReplyAttempt => write!(f, "REPLY_ATTEMPT"),
        }
    }
}

/// Append-only audit entry. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub id: i64,
    pub event: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Users & Actors
// ============================================================================

/// Operator account referenced by mention assignment and task attribution.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authenticated principal a core operation runs on behalf of.
/// Recorded in audits and task `created_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: i64,
    pub email: String,
}

impl Actor {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self { id, email: email.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_code_roundtrip() {
        for code in [
            TaskCode::FetchComments,
            TaskCode::FetchMessages,
            TaskCode::ReplyMention,
            TaskCode::ReplyMentionIgnored,
        ] {
            assert_eq!(TaskCode::from_str(code.as_str()), Some(code));
        }
        assert_eq!(TaskCode::from_str("UNKNOWN"), None);
    }

    #[test]
    fn test_mention_kind_serialization() {
        let json = serde_json::to_string(&MentionKind::Comment).unwrap();
        assert_eq!(json, "\"COMMENT\"");
        let json = serde_json::to_string(&MentionState::ReplyAttempt).unwrap();
        assert_eq!(json, "\"REPLY_ATTEMPT\"");
    }

    #[test]
    fn test_task_mention_id_extraction() {
        let task = Task {
            id: 1,
            code: TaskCode::ReplyMention,
            data: serde_json::json!({ "mentionId": 42, "content": "hi" }),
            started_at: None,
            finished_at: None,
            created_by: "ops@example.com".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(task.mention_id(), Some(42));
        assert!(!task.is_ignored());
    }

    #[test]
    fn test_ignored_task_flag() {
        let task = Task {
            id: 2,
            code: TaskCode::ReplyMentionIgnored,
            data: serde_json::json!({ "mentionId": 42, "isIgnored": true }),
            started_at: None,
            finished_at: None,
            created_by: "ops@example.com".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(task.is_ignored());
    }

    #[test]
    fn test_mention_serializes_type_field() {
        let mention = Mention {
            id: 1,
            content: "hello".to_string(),
            social_media_platform_ref: "ref-1".to_string(),
            social_media_api_post_ref: Some("post-1".to_string()),
            platform: "bluesky".to_string(),
            kind: MentionKind::Comment,
            state: None,
            disposition: None,
            user_id: None,
            mention_id: None,
            data: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&mention).unwrap();
        assert_eq!(json["type"], "COMMENT");
        assert_eq!(json["socialMediaPlatformRef"], "ref-1");
    }
}
