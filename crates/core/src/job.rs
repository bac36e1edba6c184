//! Scheduler job types.
//!
//! Jobs are persisted as documents in the `agenda` collection with
//! camelCase fields and store-assigned opaque string ids.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How often a recurring job repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    /// A fixed period in milliseconds
    Millis(i64),
    /// A 5-field cron expression: `minute hour dom month dow`
    Cron(String),
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Store-assigned opaque id
    pub id: String,

    /// Handler name this job dispatches to
    pub name: String,

    /// Earliest fire time, Unix ms
    pub run_at: i64,

    /// Opaque payload handed to the handler
    #[serde(default)]
    pub data: Value,

    /// Present for recurring jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,

    /// Collapse key: at most one persisted job per distinct value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<Value>,

    /// Set while a dispatcher holds this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,

    pub created_at: i64,
}

/// Specification for a one-shot job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub name: String,
    /// Fire time, Unix ms
    pub run_at: i64,
    #[serde(default)]
    pub data: Value,
}

/// Specification for a recurring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EverySpec {
    pub name: String,
    /// Earliest fire time, Unix ms; the first firing is never immediate
    pub run_at: i64,
    pub interval: Interval,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_deserializes_untagged() {
        let ms: Interval = serde_json::from_str("60000").unwrap();
        assert_eq!(ms, Interval::Millis(60000));

        let cron: Interval = serde_json::from_str(r#""*/5 * * * *""#).unwrap();
        assert_eq!(cron, Interval::Cron("*/5 * * * *".into()));
    }

    #[test]
    fn job_persists_camel_case() {
        let job = Job {
            id: "j1".into(),
            name: "ping".into(),
            run_at: 1000,
            data: serde_json::json!({"m": "x"}),
            interval: None,
            unique: None,
            locked_at: None,
            last_run_at: None,
            failed_at: None,
            fail_reason: None,
            created_at: 999,
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"runAt\":1000"));
        assert!(json.contains("\"createdAt\":999"));
        assert!(!json.contains("lockedAt"));
    }
}
