/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Shots are addressed by their store id.
pub type ShotId = DbId;

/// Variations are addressed by their store id.
pub type VariationId = DbId;

/// Provider identifiers are short stable slugs, e.g. `"kling-v2"`.
pub type ProviderId = String;
