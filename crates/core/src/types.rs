/// NiFi entity identifiers are server-assigned UUID strings.
pub type NodeId = String;

/// NiFi optimistic-locking revision counter.
pub type Revision = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
