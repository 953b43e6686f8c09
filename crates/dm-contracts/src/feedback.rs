use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Up => "up",
            Rating::Down => "down",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thumbs up/down on assistant messages, appended to a JSONL file.
#[derive(Debug, Clone)]
pub struct FeedbackWriter {
    path: PathBuf,
}

impl FeedbackWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        session_id: &str,
        message_id: &str,
        rating: Rating,
        reason: Option<&str>,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        payload.insert(
            "session_id".to_string(),
            Value::String(session_id.to_string()),
        );
        payload.insert(
            "message_id".to_string(),
            Value::String(message_id.to_string()),
        );
        payload.insert("rating".to_string(), serde_json::to_value(rating)?);
        payload.insert(
            "reason".to_string(),
            reason
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
        );

        append_jsonl(&self.path, &payload)?;
        Ok(payload)
    }
}

fn append_jsonl(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(serde_json::to_string(payload)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{FeedbackWriter, Rating};

    #[test]
    fn feedback_writer_appends_jsonl_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("feedback.jsonl");
        let writer = FeedbackWriter::new(&path);

        let payload = writer.record("s-1", "m-1", Rating::Down, Some("too long"))?;
        assert_eq!(payload["rating"], Value::String("down".to_string()));
        assert_eq!(payload["reason"], Value::String("too long".to_string()));

        writer.record("s-1", "m-2", Rating::Up, None)?;

        let raw = std::fs::read_to_string(path)?;
        let rows: Vec<Value> = raw
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["message_id"], Value::String("m-1".to_string()));
        assert_eq!(rows[1]["rating"], Value::String("up".to_string()));
        assert_eq!(rows[1]["reason"], Value::Null);
        assert!(rows[1].get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
