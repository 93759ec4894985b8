use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use meddx_contracts::events::{now_utc_iso, EventPayload, EventWriter, SessionEvent};
use meddx_contracts::insights::InsightKind;
use meddx_contracts::results::{DiagnosticResult, InsightResult};
use meddx_contracts::runs::summary::{write_summary, SessionSummary};
use meddx_contracts::upload::{ImageFormat, UnsupportedFormat, UploadedImage};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use crate::error::{Precondition, SessionError, SessionResult};
use crate::gateway::InferenceGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Empty,
    ImageStaged,
    Analyzing,
    ResultReady,
    InsightPending(InsightKind),
    InsightReady(InsightKind),
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::ImageStaged => "image_staged",
            Self::Analyzing => "analyzing",
            Self::ResultReady => "result_ready",
            Self::InsightPending(_) => "insight_pending",
            Self::InsightReady(_) => "insight_ready",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsightPending(kind) | Self::InsightReady(kind) => {
                write!(f, "{} ({kind})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// The uploaded image, parked in a temp file until it is analyzed.
///
/// Dropping it unlinks the file.
pub struct StagedImage {
    file_name: String,
    format: ImageFormat,
    len: usize,
    sha256: String,
    buffer: NamedTempFile,
}

impl StagedImage {
    fn write(image: &UploadedImage) -> std::io::Result<Self> {
        let mut buffer = tempfile::Builder::new()
            .prefix("meddx-")
            .suffix(&format!(".{}", image.format.extension()))
            .tempfile()?;
        buffer.write_all(&image.bytes)?;
        buffer.flush()?;
        Ok(Self {
            file_name: image.file_name.clone(),
            format: image.format,
            len: image.bytes.len(),
            sha256: image.sha256_hex(),
            buffer,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn path(&self) -> &Path {
        self.buffer.path()
    }

    fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        fs::read(self.buffer.path())
    }
}

impl fmt::Debug for StagedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedImage")
            .field("file_name", &self.file_name)
            .field("format", &self.format)
            .field("len", &self.len)
            .field("path", &self.buffer.path())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub uploads: u64,
    pub analyses: u64,
    pub insights: u64,
    pub failures: u64,
}

/// Single-user session: one staged image slot, one diagnostic report slot.
///
/// Every action runs to completion before returning; the caller is expected
/// to serialize actions (one button press, one call).
pub struct Session<G: InferenceGateway> {
    session_id: String,
    gateway: G,
    events: Option<EventWriter>,
    summary_path: Option<PathBuf>,
    started_at: String,
    phase: SessionPhase,
    staged: Option<StagedImage>,
    result: Option<DiagnosticResult>,
    counters: SessionCounters,
    event_log_error: Option<String>,
}

impl<G: InferenceGateway> Session<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            gateway,
            events: None,
            summary_path: None,
            started_at: now_utc_iso(),
            phase: SessionPhase::Empty,
            staged: None,
            result: None,
            counters: SessionCounters::default(),
            event_log_error: None,
        }
    }

    /// Session that logs to `events_path` and writes `summary.json` into
    /// `out_dir` on [`Session::finish`].
    pub fn open(
        gateway: G,
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        let mut session = Self::new(gateway);
        let events = EventWriter::new(events_path.into(), session.session_id.clone());
        events.emit(
            SessionEvent::SessionStarted,
            object(json!({
                "out_dir": out_dir.to_string_lossy().to_string(),
                "gateway": session.gateway.name(),
            })),
        )?;
        session.events = Some(events);
        session.summary_path = Some(out_dir.join("summary.json"));
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn diagnostic_result(&self) -> Option<&DiagnosticResult> {
        self.result.as_ref()
    }

    pub fn staged_image(&self) -> Option<&StagedImage> {
        self.staged.as_ref()
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Most recent event log write failure, if any. Actions never fail
    /// because the log could not be written.
    pub fn event_log_error(&self) -> Option<&str> {
        self.event_log_error.as_deref()
    }

    pub fn upload_path(&mut self, path: &Path) -> SessionResult<()> {
        let file_name = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        if let Err(source) = ImageFormat::from_file_name(&file_name) {
            return Err(self.reject_upload(file_name, source));
        }
        match fs::read(path) {
            Ok(bytes) => self.upload(&file_name, bytes),
            Err(source) => Err(self.reject_unreadable(file_name, source)),
        }
    }

    /// Stages a new image, replacing any previous one. An existing
    /// diagnostic report stays visible until the next successful analysis.
    pub fn upload(&mut self, file_name: &str, bytes: Vec<u8>) -> SessionResult<()> {
        let image = match UploadedImage::new(file_name, bytes) {
            Ok(image) => image,
            Err(source) => return Err(self.reject_upload(file_name.to_string(), source)),
        };
        let staged = StagedImage::write(&image)?;
        let payload = object(json!({
            "file_name": staged.file_name(),
            "format": staged.format().extension(),
            "bytes": staged.len(),
            "sha256": staged.sha256(),
        }));
        if let Some(previous) = self.staged.replace(staged) {
            self.release(previous, "replaced");
        }
        self.counters.uploads += 1;
        self.phase = SessionPhase::ImageStaged;
        self.emit(SessionEvent::ImageStaged, payload);
        Ok(())
    }

    /// Sends the staged image to the gateway. The image is released only
    /// on success; on failure it stays staged so the call can be repeated.
    pub fn analyze(&mut self) -> SessionResult<&DiagnosticResult> {
        let Some(staged) = self.staged.as_ref() else {
            return Err(self.reject_precondition("analyze", Precondition::NoStagedImage));
        };
        let bytes = staged.read_bytes()?;
        let format = staged.format();
        let image_payload = object(json!({
            "file_name": staged.file_name(),
            "format": format.extension(),
            "sha256": staged.sha256(),
            "gateway": self.gateway.name(),
        }));

        self.phase = SessionPhase::Analyzing;
        self.emit(SessionEvent::AnalysisStarted, image_payload);
        let started = Instant::now();
        let outcome = self.gateway.describe_image(&bytes, format);
        let latency_s = started.elapsed().as_secs_f64();
        drop(bytes);

        match outcome {
            Ok(result) => {
                if let Some(staged) = self.staged.take() {
                    self.release(staged, "analyzed");
                }
                self.counters.analyses += 1;
                self.phase = SessionPhase::ResultReady;
                self.emit(
                    SessionEvent::AnalysisCompleted,
                    object(json!({
                        "result_chars": result.text().chars().count(),
                        "latency_s": latency_s,
                    })),
                );
                Ok(self.result.insert(result))
            }
            Err(err) => {
                self.counters.failures += 1;
                self.phase = SessionPhase::ImageStaged;
                self.emit(
                    SessionEvent::AnalysisFailed,
                    object(json!({
                        "error": err.to_string(),
                        "latency_s": latency_s,
                    })),
                );
                Err(err.into())
            }
        }
    }

    /// Asks a follow-up question about the current report. The report itself
    /// is never modified.
    pub fn request_insight(&mut self, kind: InsightKind) -> SessionResult<InsightResult> {
        let Some(result) = self.result.as_ref() else {
            return Err(self.reject_precondition(kind.as_str(), Precondition::NoDiagnosticResult));
        };
        let prompt = kind.prompt(result.text());
        let previous = self.phase;

        self.phase = SessionPhase::InsightPending(kind);
        self.emit(
            SessionEvent::InsightRequested,
            object(json!({
                "kind": kind.as_str(),
                "prompt_chars": prompt.chars().count(),
                "gateway": self.gateway.name(),
            })),
        );
        let started = Instant::now();
        let outcome = self.gateway.ask(&prompt);
        let latency_s = started.elapsed().as_secs_f64();

        match outcome {
            Ok(insight) => {
                self.counters.insights += 1;
                self.phase = match previous {
                    SessionPhase::ResultReady | SessionPhase::InsightReady(_) => {
                        SessionPhase::InsightReady(kind)
                    }
                    other => other,
                };
                self.emit(
                    SessionEvent::InsightCompleted,
                    object(json!({
                        "kind": kind.as_str(),
                        "result_chars": insight.text().chars().count(),
                        "latency_s": latency_s,
                    })),
                );
                Ok(insight)
            }
            Err(err) => {
                self.counters.failures += 1;
                self.phase = previous;
                self.emit(
                    SessionEvent::InsightFailed,
                    object(json!({
                        "kind": kind.as_str(),
                        "error": err.to_string(),
                        "latency_s": latency_s,
                    })),
                );
                Err(err.into())
            }
        }
    }

    /// Releases any staged image and writes the session summary.
    pub fn finish(&mut self) -> Result<SessionSummary> {
        if let Some(staged) = self.staged.take() {
            self.release(staged, "session_finished");
        }
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            uploads: self.counters.uploads,
            analyses: self.counters.analyses,
            insights: self.counters.insights,
            failures: self.counters.failures,
            has_diagnostic_result: self.result.is_some(),
        };
        if let Some(path) = self.summary_path.as_ref() {
            write_summary(path, &summary)?;
        }
        if let Some(events) = self.events.as_ref() {
            events.emit(
                SessionEvent::SessionFinished,
                object(json!({
                    "summary_path": self
                        .summary_path
                        .as_ref()
                        .map(|path| Value::String(path.to_string_lossy().to_string()))
                        .unwrap_or(Value::Null),
                })),
            )?;
        }
        Ok(summary)
    }

    fn reject_upload(
        &mut self,
        file_name: String,
        source: UnsupportedFormat,
    ) -> SessionError {
        self.counters.failures += 1;
        self.emit(
            SessionEvent::UploadRejected,
            object(json!({
                "file_name": file_name,
                "extension": source.extension,
            })),
        );
        SessionError::UploadFormat { file_name, source }
    }

    fn reject_unreadable(&mut self, file_name: String, source: std::io::Error) -> SessionError {
        self.counters.failures += 1;
        self.emit(
            SessionEvent::UploadRejected,
            object(json!({
                "file_name": file_name,
                "error": source.to_string(),
            })),
        );
        SessionError::UploadRead { file_name, source }
    }

    fn reject_precondition(&mut self, action: &str, which: Precondition) -> SessionError {
        self.counters.failures += 1;
        self.emit(
            SessionEvent::ActionRejected,
            object(json!({
                "action": action,
                "reason": which.to_string(),
            })),
        );
        SessionError::Precondition(which)
    }

    fn release(&mut self, staged: StagedImage, reason: &str) {
        let sha256 = staged.sha256.clone();
        match staged.buffer.close() {
            Ok(()) => self.emit(
                SessionEvent::StagedImageReleased,
                object(json!({ "sha256": sha256, "reason": reason })),
            ),
            Err(err) => self.emit(
                SessionEvent::StagedImageReleaseFailed,
                object(json!({
                    "sha256": sha256,
                    "reason": reason,
                    "error": err.to_string(),
                })),
            ),
        }
    }

    fn emit(&mut self, event: SessionEvent, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event, payload) {
            self.event_log_error = Some(format!("{event}: {err:#}"));
        }
    }
}

fn object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Cursor;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{Rgb, RgbImage};
    use meddx_contracts::insights::InsightKind;
    use meddx_contracts::results::{DiagnosticResult, InsightResult};
    use meddx_contracts::upload::{data_url, ImageFormat};
    use serde_json::Value;

    use super::{Session, SessionPhase};
    use crate::error::{InferenceError, Precondition, SessionError};
    use crate::gateway::InferenceGateway;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Describe { data_url: String },
        Ask { prompt: String },
    }

    #[derive(Default)]
    struct RecordingGateway {
        calls: RefCell<Vec<Call>>,
        describe_replies: RefCell<VecDeque<Result<String, InferenceError>>>,
        ask_replies: RefCell<VecDeque<Result<String, InferenceError>>>,
    }

    impl RecordingGateway {
        fn reply_describe(self, reply: Result<&str, InferenceError>) -> Self {
            self.describe_replies
                .borrow_mut()
                .push_back(reply.map(str::to_string));
            self
        }

        fn reply_ask(self, reply: Result<&str, InferenceError>) -> Self {
            self.ask_replies
                .borrow_mut()
                .push_back(reply.map(str::to_string));
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl InferenceGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }

        fn describe_image(
            &self,
            bytes: &[u8],
            format: ImageFormat,
        ) -> Result<DiagnosticResult, InferenceError> {
            self.calls.borrow_mut().push(Call::Describe {
                data_url: data_url(bytes, format),
            });
            self.describe_replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok("default report".to_string()))
                .map(DiagnosticResult::new)
        }

        fn ask(&self, prompt: &str) -> Result<InsightResult, InferenceError> {
            self.calls.borrow_mut().push(Call::Ask {
                prompt: prompt.to_string(),
            });
            self.ask_replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok("default insight".to_string()))
                .map(InsightResult::new)
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn provider_down() -> InferenceError {
        InferenceError::Provider {
            status: 503,
            message: "The server is overloaded".to_string(),
        }
    }

    #[test]
    fn upload_then_analyze_sends_exact_base64_once_for_each_format() -> anyhow::Result<()> {
        for (name, format) in [
            ("scan.jpg", ImageFormat::Jpg),
            ("scan.jpeg", ImageFormat::Jpeg),
            ("scan.png", ImageFormat::Png),
        ] {
            let bytes: Vec<u8> = (0u8..=255).cycle().take(1024).collect();
            let mut session = Session::new(RecordingGateway::default());
            session.upload(name, bytes.clone())?;
            session.analyze()?;

            let calls = session.gateway().calls();
            assert_eq!(calls.len(), 1, "{name}");
            let Call::Describe { data_url } = &calls[0] else {
                panic!("expected describe call");
            };
            let prefix = format!("data:{};base64,", format.mime_type());
            let encoded = data_url.strip_prefix(&prefix).unwrap();
            assert_eq!(encoded, BASE64.encode(&bytes));
        }
        Ok(())
    }

    #[test]
    fn unsupported_upload_is_rejected_before_staging() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default());
        session.upload("first.png", png_bytes())?;

        let err = session.upload("scan.gif", vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, SessionError::UploadFormat { .. }));
        assert!(err.to_string().contains("gif"));
        assert_eq!(
            session.staged_image().map(|staged| staged.file_name()),
            Some("first.png")
        );
        assert!(session.gateway().calls().is_empty());
        Ok(())
    }

    #[test]
    fn analyze_without_staged_image_fails_without_calling_gateway() {
        let mut session = Session::new(RecordingGateway::default());
        let err = session.analyze().unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NoStagedImage));
        assert!(session.gateway().calls().is_empty());
        assert_eq!(session.phase(), SessionPhase::Empty);
    }

    #[test]
    fn insight_without_result_fails_without_calling_gateway() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default());
        session.upload("scan.png", png_bytes())?;
        for kind in InsightKind::ALL {
            let err = session.request_insight(kind).unwrap_err();
            assert_eq!(err.precondition(), Some(Precondition::NoDiagnosticResult));
        }
        assert!(session.gateway().calls().is_empty());
        assert_eq!(session.phase(), SessionPhase::ImageStaged);
        Ok(())
    }

    #[test]
    fn every_insight_prompt_embeds_report_and_kind_instruction() -> anyhow::Result<()> {
        let report = "Findings: mild opacity in left lower lobe.";
        let mut session =
            Session::new(RecordingGateway::default().reply_describe(Ok(report)));
        session.upload("xray.jpeg", png_bytes())?;
        session.analyze()?;

        for kind in InsightKind::ALL {
            session.request_insight(kind)?;
        }
        let prompts: Vec<String> = session
            .gateway()
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Ask { prompt } => Some(prompt),
                Call::Describe { .. } => None,
            })
            .collect();
        assert_eq!(prompts.len(), InsightKind::ALL.len());
        for (kind, prompt) in InsightKind::ALL.iter().zip(&prompts) {
            assert!(prompt.contains(report));
            assert!(prompt.contains(kind.instruction()));
        }
        for (idx, prompt) in prompts.iter().enumerate() {
            assert!(!prompts[idx + 1..].contains(prompt));
        }
        assert_eq!(
            session.diagnostic_result().map(DiagnosticResult::text),
            Some(report)
        );
        Ok(())
    }

    #[test]
    fn failed_analysis_keeps_result_unset_and_image_staged() -> anyhow::Result<()> {
        let mut session = Session::new(
            RecordingGateway::default()
                .reply_describe(Err(provider_down()))
                .reply_describe(Ok("Findings: recovered.")),
        );
        session.upload("scan.png", png_bytes())?;

        let err = session.analyze().unwrap_err();
        assert!(matches!(err, SessionError::Inference(_)));
        assert!(err.to_string().contains("The server is overloaded"));
        assert!(session.diagnostic_result().is_none());
        assert_eq!(session.phase(), SessionPhase::ImageStaged);
        let staged_path = session
            .staged_image()
            .map(|staged| staged.path().to_path_buf())
            .unwrap();
        assert!(staged_path.exists());

        let result = session.analyze()?;
        assert_eq!(result.text(), "Findings: recovered.");
        assert!(!staged_path.exists());
        assert_eq!(session.counters().failures, 1);
        Ok(())
    }

    #[test]
    fn failed_insight_leaves_result_and_phase_untouched() -> anyhow::Result<()> {
        let mut session = Session::new(
            RecordingGateway::default()
                .reply_describe(Ok("R1"))
                .reply_ask(Err(InferenceError::Transport("connection reset".to_string()))),
        );
        session.upload("scan.png", png_bytes())?;
        session.analyze()?;

        let err = session.request_insight(InsightKind::Causes).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(session.phase(), SessionPhase::ResultReady);
        assert_eq!(session.diagnostic_result().map(DiagnosticResult::text), Some("R1"));
        Ok(())
    }

    #[test]
    fn analysis_is_one_shot_per_upload() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default());
        session.upload("scan.png", png_bytes())?;
        session.analyze()?;
        assert!(session.staged_image().is_none());

        let err = session.analyze().unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NoStagedImage));
        assert_eq!(session.gateway().calls().len(), 1);
        Ok(())
    }

    #[test]
    fn reupload_keeps_stale_result_until_next_analysis() -> anyhow::Result<()> {
        let mut session = Session::new(
            RecordingGateway::default()
                .reply_describe(Ok("R1"))
                .reply_describe(Ok("R2")),
        );
        session.upload("a.png", png_bytes())?;
        session.analyze()?;
        assert_eq!(session.phase(), SessionPhase::ResultReady);
        assert_eq!(session.diagnostic_result().map(DiagnosticResult::text), Some("R1"));

        session.upload("b.jpg", vec![0xff, 0xd8, 0xff, 0xe0])?;
        assert_eq!(session.phase(), SessionPhase::ImageStaged);
        assert_eq!(session.diagnostic_result().map(DiagnosticResult::text), Some("R1"));

        session.analyze()?;
        assert_eq!(session.diagnostic_result().map(DiagnosticResult::text), Some("R2"));
        Ok(())
    }

    #[test]
    fn insight_on_stale_result_keeps_image_staged_phase() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default().reply_describe(Ok("R1")));
        session.upload("a.png", png_bytes())?;
        session.analyze()?;
        session.upload("b.png", png_bytes())?;

        session.request_insight(InsightKind::Precautions)?;
        assert_eq!(session.phase(), SessionPhase::ImageStaged);
        assert!(session.staged_image().is_some());
        Ok(())
    }

    #[test]
    fn reupload_releases_previous_staged_file() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default());
        session.upload("a.png", png_bytes())?;
        let first = session
            .staged_image()
            .map(|staged| staged.path().to_path_buf())
            .unwrap();
        assert!(first.exists());
        assert_eq!(first.extension().and_then(|ext| ext.to_str()), Some("png"));

        session.upload("b.jpeg", png_bytes())?;
        assert!(!first.exists());
        assert_eq!(
            session.staged_image().map(|staged| staged.format()),
            Some(ImageFormat::Jpeg)
        );
        Ok(())
    }

    #[test]
    fn upload_path_checks_format_then_reads_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("lesion.png");
        std::fs::write(&image_path, png_bytes())?;
        let text_path = temp.path().join("notes.txt");
        std::fs::write(&text_path, "not an image")?;

        let events_path = temp.path().join("events.jsonl");
        let mut session = Session::open(RecordingGateway::default(), temp.path(), &events_path)?;
        let err = session.upload_path(&text_path).unwrap_err();
        assert!(matches!(err, SessionError::UploadFormat { .. }));

        let err = session
            .upload_path(&temp.path().join("missing.png"))
            .unwrap_err();
        assert!(matches!(err, SessionError::UploadRead { .. }));
        assert!(err.to_string().starts_with("could not read missing.png"));
        assert_eq!(session.counters().failures, 2);
        assert_eq!(session.phase(), SessionPhase::Empty);

        session.upload_path(&image_path)?;
        let staged = session.staged_image().unwrap();
        assert_eq!(staged.file_name(), "lesion.png");
        assert_eq!(staged.len(), png_bytes().len());

        let rejected: Vec<Value> = std::fs::read_to_string(&events_path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|row| row["type"] == "upload_rejected")
            .collect();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0]["extension"], "txt");
        assert_eq!(rejected[1]["file_name"], "missing.png");
        assert!(rejected[1]["error"].as_str().is_some());
        Ok(())
    }

    #[test]
    fn lesion_png_to_eli5_end_to_end() -> anyhow::Result<()> {
        let report = "Findings: 4 mm pigmented lesion with regular borders.\nRecommended next steps: dermatology follow-up.\nConsult with a doctor before making any decisions.";
        let simplified = "There is a tiny spot on the skin. A doctor should look at it.";
        let mut session = Session::new(
            RecordingGateway::default()
                .reply_describe(Ok(report))
                .reply_ask(Ok(simplified)),
        );
        let bytes = png_bytes();
        session.upload("lesion.png", bytes.clone())?;
        assert_eq!(session.analyze()?.text(), report);

        let insight = session.request_insight(InsightKind::Eli5)?;
        assert_eq!(insight.text(), simplified);
        assert_eq!(session.phase(), SessionPhase::InsightReady(InsightKind::Eli5));

        let calls = session.gateway().calls();
        assert_eq!(
            calls[0],
            Call::Describe {
                data_url: format!("data:image/png;base64,{}", BASE64.encode(&bytes)),
            }
        );
        let Call::Ask { prompt } = &calls[1] else {
            panic!("expected ask call");
        };
        assert!(prompt.contains(report));
        assert!(prompt.contains("simple terms for a 5-year-old"));
        Ok(())
    }

    #[test]
    fn open_session_logs_events_and_writes_summary() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("session");
        let events_path = out_dir.join("events.jsonl");
        let mut session = Session::open(
            RecordingGateway::default().reply_describe(Err(provider_down())),
            &out_dir,
            &events_path,
        )?;
        session.upload("scan.png", png_bytes())?;
        let _ = session.analyze();
        session.analyze()?;
        session.request_insight(InsightKind::Causes)?;
        let summary = session.finish()?;
        assert_eq!(summary.uploads, 1);
        assert_eq!(summary.analyses, 1);
        assert_eq!(summary.insights, 1);
        assert_eq!(summary.failures, 1);
        assert!(summary.has_diagnostic_result);
        assert!(session.event_log_error().is_none());

        let raw = std::fs::read_to_string(&events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "image_staged",
                "analysis_started",
                "analysis_failed",
                "analysis_started",
                "staged_image_released",
                "analysis_completed",
                "insight_requested",
                "insight_completed",
                "session_finished",
            ]
        );
        assert!(rows
            .iter()
            .all(|row| row["session_id"].as_str() == Some(session.session_id())));
        assert!(!raw.contains("default report"));

        let parsed: Value =
            serde_json::from_str(&std::fs::read_to_string(out_dir.join("summary.json"))?)?;
        assert_eq!(parsed["session_id"].as_str(), Some(session.session_id()));
        Ok(())
    }

    #[test]
    fn finish_releases_staged_image() -> anyhow::Result<()> {
        let mut session = Session::new(RecordingGateway::default());
        session.upload("scan.png", png_bytes())?;
        let path = session
            .staged_image()
            .map(|staged| staged.path().to_path_buf())
            .unwrap();
        let summary = session.finish()?;
        assert!(!path.exists());
        assert!(!summary.has_diagnostic_result);
        Ok(())
    }
}
