//! Well-known identifiers shared by every crate of the engine.

/// Segment holding the talent output features.
pub const DEFAULT_SEGMENT: &str = "000000";
/// Type holding the talent output features.
pub const DEFAULT_TYPE: &str = "default";
pub const DEFAULT_INSTANCE: &str = "default";

pub const DEFAULT_FEATURE_TTL_MS: i64 = 30_000;
/// If nothing is defined for a type, there is always one entry in the history.
pub const DEFAULT_HISTORY_LENGTH: usize = 1;

pub const PATH_IDENTITY: &str = "";
pub const ANY_FEATURE: &str = "*";
pub const ALL_TYPES: &str = "*";
pub const ALL_SEGMENTS: &str = "*";
pub const ALL_INSTANCE_IDS_FILTER: &str = ".*";

/// Marker key of a value that points to its numeric part.
pub const VPATH_KEY: &str = "$vpath";
/// Marker key of a raw value that updates one slot of an array feature.
pub const PART_KEY: &str = "$part";

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
