/// All database primary keys are SQLite INTEGER PRIMARY KEY rows.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a configured proxy connection (a client path plus its
/// target endpoints). Keys the `connections.json` map.
pub type ConnectionId = String;

/// 1-based index of a target endpoint within a connection.
///
/// Index 0 is reserved for the gateway itself (replies it injects into
/// the stream toward the client, e.g. auth command responses).
pub type TargetIndex = usize;
