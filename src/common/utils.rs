//! Utility functions for quorumdb

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Join a collection of display items into a stable, comma-separated list
/// for error messages and log lines.
pub fn display_list<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut parts: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    parts.sort();
    parts.join(", ")
}
