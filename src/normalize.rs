use crate::models::{
    BleepDetails, EpochMillis, Item, ItemDetails, JobDetails, ProgressEntry, Urgency,
};
use serde_json::Value;
use uuid::Uuid;

pub fn new_item_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Splits comma-separated task text, trimming and dropping empty entries.
pub fn parse_tasks(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|task| !task.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Coerces a stored record of unknown shape into a canonical item. Never fails:
/// every field that is missing or malformed is replaced with its default.
pub fn normalize_record(raw: &Value, now: EpochMillis) -> Item {
    let created_at = millis_field(raw, "createdAt").unwrap_or(now);

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(new_item_id);

    let details = if raw.get("type").and_then(Value::as_str) == Some("bleep") {
        ItemDetails::Bleep(BleepDetails {
            from: string_field(raw, "from"),
            location: string_field(raw, "location"),
            summary: string_field(raw, "summary"),
            urgency: raw
                .get("urgency")
                .and_then(Value::as_str)
                .and_then(Urgency::parse)
                .unwrap_or_default(),
            called_back: truthy(raw.get("calledBack")),
            received_at: millis_field(raw, "receivedAt").unwrap_or(created_at),
        })
    } else {
        ItemDetails::Job(JobDetails {
            ward: string_field(raw, "ward"),
            bed: string_field(raw, "bed"),
            summary: string_field(raw, "summary"),
            tasks: normalize_tasks(raw.get("tasks")),
        })
    };

    Item {
        id,
        done: truthy(raw.get("done")),
        created_at,
        pinned: truthy(raw.get("pinned")),
        next_actions: string_field(raw, "nextActions"),
        progress_log: normalize_progress(raw, created_at),
        details,
    }
}

/// Session-local edit flag carried alongside a stored record.
pub fn record_editing_flag(raw: &Value) -> bool {
    truthy(raw.get("editing"))
}

fn normalize_tasks(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|task| !task.is_empty())
            .map(ToString::to_string)
            .collect(),
        Some(Value::String(text)) => parse_tasks(text),
        _ => Vec::new(),
    }
}

fn normalize_progress(raw: &Value, created_at: EpochMillis) -> Vec<ProgressEntry> {
    if let Some(entries) = raw.get("progressLog").and_then(Value::as_array) {
        return entries
            .iter()
            .filter_map(|entry| {
                let text = entry.get("text").and_then(Value::as_str)?;
                if text.is_empty() {
                    return None;
                }
                Some(ProgressEntry {
                    t: millis_field(entry, "t").unwrap_or(created_at),
                    text: text.to_string(),
                })
            })
            .collect();
    }

    match raw.get("doneNotes").and_then(Value::as_str).map(str::trim) {
        Some(notes) if !notes.is_empty() => vec![ProgressEntry {
            t: created_at,
            text: notes.to_string(),
        }],
        _ => Vec::new(),
    }
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_default()
}

fn millis_field(raw: &Value, key: &str) -> Option<EpochMillis> {
    let Value::Number(number) = raw.get(key)? else {
        return None;
    };
    number.as_i64().or_else(|| {
        number
            .as_f64()
            .filter(|value| value.is_finite() && value.abs() < i64::MAX as f64)
            .map(|value| value as i64)
    })
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(false),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
