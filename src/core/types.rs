//! Transcodio Core Type Definitions
//!
//! Fundamental types shared across the engine.

// =============================================================================
// ID Types
// =============================================================================

/// Job unique identifier (ULID)
pub type JobId = String;

// =============================================================================
// Time helpers
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Current time as an RFC 3339 UTC string.
///
/// All persisted timestamps in the job table and the durable log use this
/// format so log lines and notification payloads sort lexicographically.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
