use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Everything a session can record in `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStarted,
    ImageStaged,
    UploadRejected,
    ActionRejected,
    AnalysisStarted,
    AnalysisCompleted,
    AnalysisFailed,
    InsightRequested,
    InsightCompleted,
    InsightFailed,
    StagedImageReleased,
    StagedImageReleaseFailed,
    SessionFinished,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::ImageStaged => "image_staged",
            Self::UploadRejected => "upload_rejected",
            Self::ActionRejected => "action_rejected",
            Self::AnalysisStarted => "analysis_started",
            Self::AnalysisCompleted => "analysis_completed",
            Self::AnalysisFailed => "analysis_failed",
            Self::InsightRequested => "insight_requested",
            Self::InsightCompleted => "insight_completed",
            Self::InsightFailed => "insight_failed",
            Self::StagedImageReleased => "staged_image_released",
            Self::StagedImageReleaseFailed => "staged_image_release_failed",
            Self::SessionFinished => "session_finished",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// Appends one compact JSON object per line to a session's event log.
///
/// `type`, `session_id` and `ts` always come from the writer; payload
/// entries with those keys are dropped.
#[derive(Debug)]
pub struct EventWriter {
    path: PathBuf,
    session_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert("type".to_string(), Value::String(event.as_str().to_string()));
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

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut encoded = serde_json::to_string(&line)?;
        encoded.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(encoded.as_bytes())?;

        Ok(Value::Object(line))
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
