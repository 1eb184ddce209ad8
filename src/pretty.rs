//! Formatting helpers for diagnostic dumps
//!
//! Call and signal dumps are meant for a developer console, so timestamps,
//! durations and payloads get compact human-readable forms here.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Format a timestamp as `HH:MM:SS.mmm` (UTC).
pub fn pretty_date(ts: DateTime<Utc>) -> String {
    ts.format("%H:%M:%S%.3f").to_string()
}

/// Format a duration compactly: sub-second as millis, otherwise seconds.
pub fn pretty_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

/// Render a JSON payload truncated to `max` characters for table rows.
pub fn truncate_payload(payload: &serde_json::Value, max: usize) -> String {
    let s = match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.chars().count() > max {
        let mut t: String = s.chars().take(max).collect();
        t.push('…');
        t
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pretty_duration() {
        assert_eq!(pretty_duration(Duration::from_millis(12)), "12ms");
        assert_eq!(pretty_duration(Duration::from_millis(999)), "999ms");
        assert_eq!(pretty_duration(Duration::from_millis(1500)), "1.500s");
    }

    #[test]
    fn test_truncate_payload() {
        let long = json!("abcdefghij");
        assert_eq!(truncate_payload(&long, 4), "abcd…");
        let short = json!({"k": 1});
        assert_eq!(truncate_payload(&short, 64), r#"{"k":1}"#);
    }
}
