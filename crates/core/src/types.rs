/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifies one settings session in logs and events.
pub type SessionId = uuid::Uuid;
