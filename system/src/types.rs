use serde::{Deserialize, Serialize};
use std::fmt;

pub type ParticipantId = String;

/// Length of generated session and participant identifiers.
pub const SHORT_ID_LEN: usize = 8;

/// Short, human-shareable session token. Always stored uppercase so lookups are
/// case-insensitive.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Ids match case-insensitively; nothing else is normalised.
    pub fn new(raw: &str) -> Self {
        Self(raw.to_uppercase())
    }

    pub fn generate() -> Self {
        Self(short_id().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// First eight hex digits of a random v4 uuid.
pub fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

/// Seconds since the unix epoch with millisecond precision.
pub fn epoch_seconds(at: chrono::DateTime<chrono::Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Public view of a participant, as carried in membership snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub name: String,
    pub color: String,
    pub cursor_position: i64,
}
