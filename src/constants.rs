//! Application-wide constants
//!
//! Centralizes magic values that are used across multiple modules.

/// Reserved rate-limit bucket keys.
pub mod buckets {
    pub const GLOBAL: &str = "__global__";
    pub const FALLBACK_MATCH: &str = "__fallback_match__";
    pub const FALLBACK_SEARCH: &str = "__fallback_search__";
}

/// Cache TTL values (in seconds)
pub mod cache {
    /// Provider search result lists (3 hours).
    pub const SEARCH_TTL_SECONDS: i64 = 10_800;

    /// Supplemental alias lists cached next to search results.
    pub const ALIAS_TTL_SECONDS: i64 = 10_800;

    /// Metadata details fetched during auto import.
    pub const METADATA_TTL_SECONDS: i64 = 3600;
}

/// Rate limiting
pub mod rate_limit {
    /// Combined cap across both fallback buckets per window.
    pub const FALLBACK_TOTAL_LIMIT: i32 = 50;

    /// Retry-after handed out while the limiter is safe-blocked.
    pub const SAFE_BLOCK_RETRY_SECONDS: u64 = 3600;
}

/// Task manager defaults
pub mod tasks {
    /// Window in which a terminal task with the same unique key rejects a
    /// resubmission (operator-tunable via `taskDuplicateThresholdHours`).
    pub const DUPLICATE_THRESHOLD_HOURS: i64 = 3;
}

/// Network deadlines
pub mod timeouts {
    use std::time::Duration;

    /// Per-call deadline for provider and metadata requests.
    pub const PROVIDER_CALL: Duration = Duration::from_secs(30);

    /// Per-call deadline for AI requests.
    pub const AI_CALL: Duration = Duration::from_secs(20);
}

/// Matching thresholds
pub mod matching {
    /// Minimum fuzzy similarity for a metadata alias to count as validated.
    pub const ALIAS_VALIDATION_SCORE: i32 = 70;

    /// Minimum partial-ratio against any validated alias for a candidate to
    /// survive the alias filter.
    pub const ALIAS_FILTER_SCORE: i32 = 85;

    /// Candidates within this delta of the top webhook match score are all
    /// imported.
    pub const FUZZY_TIE_SCORE_DELTA: i32 = 10;
}
