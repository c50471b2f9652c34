//! Normalization of generation-service responses.
//!
//! The service has shipped several response layouts over time: job ids at the
//! top level or under `data`, poll results flat or wrapped in a per-job list,
//! result payloads as objects, one-element lists, or JSON-encoded strings, and
//! audio either as a downloadable path or as embedded base64. Every shape is
//! handled here so the rest of the crate only sees [`JobId`] and [`JobStatus`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use super::error::SubmitError;
use super::types::{JobId, JobOutput, JobStatus, OutputLocator};

const STATUS_SUCCEEDED: i64 = 1;
const STATUS_FAILED: i64 = 2;

/// Keys that carry a downloadable output path.
const PATH_KEYS: [&str; 2] = ["audio_path", "file"];

/// Keys that carry base64-encoded audio.
const INLINE_KEYS: [&str; 2] = ["audio_base64", "audio"];

/// Extract the job id from a `release_task` response.
pub fn decode_submit(body: &Value) -> Result<JobId, SubmitError> {
    let container = match body.get("data") {
        Some(data) if data.is_object() => data,
        _ => body,
    };

    match container.get("task_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(JobId::new(id.clone())),
        Some(Value::Number(n)) => Ok(JobId::new(n.to_string())),
        _ => Err(SubmitError::Protocol(format!(
            "no task_id in response: {}",
            super::error::excerpt(&body.to_string())
        ))),
    }
}

/// Reduce a `query_result` response to the status of `job_id`.
///
/// An unknown job, an empty result list, and an unrecognized status code all
/// map to [`JobStatus::Pending`].
pub fn decode_poll(body: &Value, job_id: &JobId) -> JobStatus {
    let (status, fields) = match body.get("data") {
        Some(Value::Array(items)) => {
            // Items that name some other job say nothing about this one.
            let item = match items.iter().find(|item| item_matches(item, job_id)) {
                Some(item) => Some(item),
                None if items.iter().any(has_task_id) => None,
                None => items.first(),
            };
            let Some(item) = item else {
                debug!(job_id = %job_id, "Job not yet known to the service");
                return JobStatus::Pending;
            };
            let fields = item.get("result").map(unwrap_result).unwrap_or_default();
            (item.get("status").and_then(status_code), fields)
        }
        _ => {
            let fields = body.as_object().cloned().unwrap_or_default();
            (body.get("status").and_then(status_code), fields)
        }
    };

    match status {
        Some(STATUS_SUCCEEDED) => JobStatus::Succeeded(JobOutput {
            locator: output_locator(&fields),
            raw: Value::Object(fields),
        }),
        Some(STATUS_FAILED) => JobStatus::Failed(failure_reason(&fields)),
        _ => JobStatus::Pending,
    }
}

fn has_task_id(item: &Value) -> bool {
    !matches!(item.get("task_id"), None | Some(Value::Null))
}

fn item_matches(item: &Value, job_id: &JobId) -> bool {
    match item.get("task_id") {
        Some(Value::String(id)) => id == job_id.as_str(),
        Some(Value::Number(n)) => n.to_string() == job_id.as_str(),
        _ => false,
    }
}

/// Status codes arrive as integers or as numeric strings.
fn status_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Peel the string and list layers off a per-job `result` field.
fn unwrap_result(value: &Value) -> Map<String, Value> {
    let decoded;
    let mut current = value;

    if let Value::String(encoded) = current {
        if encoded.trim().is_empty() {
            return Map::new();
        }
        decoded = match serde_json::from_str::<Value>(encoded) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Result payload is not valid JSON; treating as absent");
                return Map::new();
            }
        };
        current = &decoded;
    }

    if let Value::Array(items) = current {
        match items.first() {
            Some(first) => current = first,
            None => return Map::new(),
        }
    }

    current.as_object().cloned().unwrap_or_default()
}

fn output_locator(fields: &Map<String, Value>) -> Option<OutputLocator> {
    for key in PATH_KEYS {
        if let Some(Value::String(path)) = fields.get(key) {
            if !path.is_empty() {
                return Some(OutputLocator::Remote(path.clone()));
            }
        }
    }

    for key in INLINE_KEYS {
        if let Some(Value::String(encoded)) = fields.get(key) {
            match STANDARD.decode(encoded.trim()) {
                Ok(audio) if !audio.is_empty() => {
                    return Some(OutputLocator::Inline(Bytes::from(audio)));
                }
                Ok(_) => {}
                Err(e) => debug!(key, error = %e, "Embedded audio is not valid base64"),
            }
        }
    }

    None
}

fn failure_reason(fields: &Map<String, Value>) -> String {
    ["error", "message"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null => None,
            Value::String(_) => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}
