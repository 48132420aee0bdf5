//! Stored verification result.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The outcome of one completed verification, keyed by the host's stable
/// group identifier.
///
/// Persisted by a verification sink; re-verifying a group replaces its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: String,
    pub output: String,
    /// Local date, `YYYY-MM-DD`.
    pub date: String,
    /// Local time, `HH:MM:SS`.
    pub time: String,
}

impl VerificationRecord {
    /// Stamp a record with the current local date and time.
    pub fn now(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::at(id, output, Local::now())
    }

    pub fn at(id: impl Into<String>, output: impl Into<String>, when: DateTime<Local>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            date: when.format("%Y-%m-%d").to_string(),
            time: when.format("%H:%M:%S").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamps_date_and_time() {
        let when = Local.with_ymd_and_hms(2025, 3, 25, 9, 5, 7).unwrap();
        let record = VerificationRecord::at("req-1", "Looks consistent.", when);
        assert_eq!(record.date, "2025-03-25");
        assert_eq!(record.time, "09:05:07");
        assert_eq!(record.id, "req-1");
    }

    #[test]
    fn record_json_shape() {
        let json = r#"{
            "id": "uc-4",
            "output": "Missing actor.",
            "date": "2025-03-25",
            "time": "12:00:00"
        }"#;
        let parsed: VerificationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.output, "Missing actor.");
    }
}
