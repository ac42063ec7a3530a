/// Characters are owned by the external profile service and keyed by UUID.
pub type CharacterId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
