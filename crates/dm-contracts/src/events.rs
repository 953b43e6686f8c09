use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// Everything the chat engine records about a session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    ParameterSelected,
    SubmissionStarted,
    SubmissionCompleted,
    SubmissionFailed,
    SubmissionDiscarded,
    ImageRequested,
    ImageCompleted,
    ImageFailed,
    MessageRated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::ParameterSelected => "parameter_selected",
            EventKind::SubmissionStarted => "submission_started",
            EventKind::SubmissionCompleted => "submission_completed",
            EventKind::SubmissionFailed => "submission_failed",
            EventKind::SubmissionDiscarded => "submission_discarded",
            EventKind::ImageRequested => "image_requested",
            EventKind::ImageCompleted => "image_completed",
            EventKind::ImageFailed => "image_failed",
            EventKind::MessageRated => "message_rated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only session diagnostics, one compact JSON object per line.
///
/// Each line carries `type`, `session_id` and `ts`. Payload keys that collide
/// with those are dropped. Clones and [`EventWriter::for_session`] share one file
/// lock, so lines from consecutive sessions never interleave.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SharedLog>,
    session_id: String,
}

#[derive(Debug)]
struct SharedLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SharedLog {
                path: path.into(),
                lock: Mutex::new(()),
            }),
            session_id: session_id.into(),
        }
    }

    /// Same file, different session.
    pub fn for_session(&self, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session_id: session_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        line.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        line.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );

        let encoded = serde_json::to_string(&line)?;
        self.append_line(&encoded)?;
        Ok(Value::Object(line))
    }

    fn append_line(&self, encoded: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.shared.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self
            .shared
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?;
        writeln!(file, "{encoded}")?;
        Ok(())
    }
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        Ok(fs::read_to_string(path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[test]
    fn emit_writes_header_and_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("message_id".to_string(), Value::String("m-1".to_string()));
        let emitted = writer.emit(EventKind::SubmissionCompleted, payload)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines, vec![emitted]);
        assert_eq!(lines[0]["type"], "submission_completed");
        assert_eq!(lines[0]["session_id"], "session-1");
        assert_eq!(lines[0]["message_id"], "m-1");
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn session_writers_share_one_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let first = EventWriter::new(&path, "session-1");
        let second = first.for_session("session-2");

        first.emit(EventKind::SessionStarted, EventPayload::new())?;
        second.emit(EventKind::SessionStarted, EventPayload::new())?;

        let sessions: Vec<Value> = read_lines(&path)?
            .into_iter()
            .map(|row| row["session_id"].clone())
            .collect();
        assert_eq!(sessions, vec!["session-1", "session-2"]);
        assert_eq!(second.path(), path.as_path());
        assert_eq!(second.session_id(), "session-2");
        Ok(())
    }

    #[test]
    fn payload_cannot_rewrite_the_header() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-1");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("forged".to_string()));
        payload.insert("session_id".to_string(), Value::String("other".to_string()));
        payload.insert("axis".to_string(), Value::String("biome".to_string()));
        let emitted = writer.emit(EventKind::ParameterSelected, payload)?;

        assert_eq!(emitted["type"], "parameter_selected");
        assert_eq!(emitted["session_id"], "session-1");
        assert_eq!(emitted["axis"], "biome");
        Ok(())
    }

    #[test]
    fn kind_names_match_serde_names() -> anyhow::Result<()> {
        for kind in [
            EventKind::SessionStarted,
            EventKind::SubmissionDiscarded,
            EventKind::ImageFailed,
            EventKind::MessageRated,
        ] {
            assert_eq!(serde_json::to_value(kind)?, Value::String(kind.to_string()));
        }
        Ok(())
    }
}
