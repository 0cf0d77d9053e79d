use crate::model::Ms;

pub const MAX_RESOURCE_NAME_LEN: usize = 256;
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// One week.
pub const MAX_DURATION_MINUTES: u32 = 7 * 24 * 60;

/// Upper bound for the configurable suggestion count.
pub const MAX_SUGGESTIONS: usize = 64;

/// 1970-01-01 .. 2200-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
