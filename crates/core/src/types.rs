/// Jobs, queue items, requests and API keys are identified by UUIDv7.
pub type EntityId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new time-ordered identifier.
pub fn new_id() -> EntityId {
    uuid::Uuid::now_v7()
}
