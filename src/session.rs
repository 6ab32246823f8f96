// session.rs — Everything the inspector remembers between requests.
//
// Plain data plus the request-generation counter. The orchestrator owns the
// transitions; nothing here does I/O.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::capture::{FrameSample, VideoSource};
use crate::error::InputError;
use crate::stats::AnalysisStats;

pub const GREETING: &str =
    "Hello! I am your Manufacturing Inspector AI. How can I help you with the analysis report?";

/// Reports longer than this are described as having "a lot of content".
const LONG_REPORT_CHARS: usize = 500;
const MAX_QUICK_ACTIONS: usize = 3;

/// Keyword → suggested question, checked in this order.
const KEYWORD_ACTIONS: [(&str, &str); 4] = [
    ("safety", "What are the main safety concerns?"),
    ("quality", "Summarize the quality issues."),
    ("efficiency", "How can we improve efficiency?"),
    ("deviation", "List process deviations."),
];
const GENERAL_ACTIONS: [&str; 2] = [
    "Give me a brief summary of the analysis.",
    "What are the key recommendations?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// One SOP image the video is compared against.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub name: String,
    pub mime_type: String,
    data: Arc<Vec<u8>>,
}

impl ReferenceImage {
    /// Only `image/*` MIME types are accepted.
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self, InputError> {
        let mime_type = mime_type.into();
        if !mime_type.starts_with("image/") {
            return Err(InputError::UnsupportedMedia {
                expected: "image",
                mime_type,
            });
        }
        Ok(Self {
            name: name.into(),
            mime_type,
            data: Arc::new(data),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn base64(&self) -> String {
        BASE64.encode(self.data.as_slice())
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Where the current request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Preparing,
    Dispatched,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Preparing | Phase::Dispatched)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "IDLE",
            Phase::Preparing => "PREPARING",
            Phase::Dispatched => "DISPATCHED",
            Phase::Complete => "COMPLETE",
            Phase::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Default)]
pub struct Session {
    video: Option<VideoSource>,
    references: Vec<ReferenceImage>,
    /// Set only by a successful analysis.
    report: Option<String>,
    /// "Analysis Error: …" shown in place of the report after a failed analysis.
    report_error: Option<String>,
    chat: Vec<ChatTurn>,
    frames: Vec<FrameSample>,
    stats: Option<AnalysisStats>,
    pub status: String,
    pub progress: u8,
    pub phase: Phase,
    pub last_error: Option<String>,
    generation: u64,
}

impl Session {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    /// Start a new request. Every earlier id stops being current.
    pub fn begin_request(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Invalidate whatever is in flight without starting anything.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
        if self.phase.is_busy() {
            self.phase = Phase::Idle;
            self.progress = 0;
        }
    }

    pub fn is_current(&self, request_id: u64) -> bool {
        self.generation == request_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_video(&mut self, video: VideoSource) {
        self.video = Some(video);
        self.frames.clear();
        self.clear_report();
        self.bump_generation();
    }

    pub fn add_reference(&mut self, image: ReferenceImage) {
        self.references.push(image);
        self.clear_report();
        self.bump_generation();
    }

    pub fn remove_reference(&mut self, index: usize) -> Result<ReferenceImage, InputError> {
        if index >= self.references.len() {
            return Err(InputError::NoSuchReference(index));
        }
        let removed = self.references.remove(index);
        self.clear_report();
        self.bump_generation();
        Ok(removed)
    }

    fn clear_report(&mut self) {
        self.report = None;
        self.report_error = None;
        self.stats = None;
    }

    /// Cache the frames of the analysis in progress.
    pub fn set_frames(&mut self, frames: Vec<FrameSample>) {
        self.frames = frames;
    }

    /// Store a successful analysis. The transcript restarts from its summary.
    pub fn complete_analysis(&mut self, report: String, stats: AnalysisStats) {
        self.chat = vec![ChatTurn::assistant(stats.summary())];
        self.report = Some(report);
        self.report_error = None;
        self.stats = Some(stats);
        self.last_error = None;
    }

    /// Record a failed analysis. The report slot stays empty.
    pub fn fail_analysis(&mut self, message: &str) {
        self.report = None;
        self.stats = None;
        self.report_error = Some(format!("Analysis Error: {message}"));
        self.chat
            .push(ChatTurn::assistant(format!("Error during analysis: {message}")));
        self.last_error = Some(message.to_string());
    }

    pub fn push_turn(&mut self, turn: ChatTurn) {
        self.chat.push(turn);
    }

    /// Reset the transcript to the greeting.
    pub fn start_new_chat(&mut self) {
        self.chat = vec![ChatTurn::assistant(GREETING)];
        if let Some(report) = &self.report {
            let size = if report.chars().count() > LONG_REPORT_CHARS {
                "a lot of content."
            } else {
                "some content."
            };
            self.chat.push(ChatTurn::assistant(format!(
                "The current analysis report has {size} Feel free to ask specific questions about it."
            )));
        }
    }

    /// Up to three suggested follow-up questions derived from the report.
    pub fn quick_actions(&self) -> Vec<&'static str> {
        let Some(report) = self.report.as_deref().filter(|r| !r.is_empty()) else {
            return Vec::new();
        };
        let lower = report.to_lowercase();
        let mut actions: Vec<&'static str> = KEYWORD_ACTIONS
            .iter()
            .filter(|(keyword, _)| lower.contains(keyword))
            .map(|(_, action)| *action)
            .collect();
        if actions.is_empty() {
            actions.extend(GENERAL_ACTIONS);
        }
        actions.truncate(MAX_QUICK_ACTIONS);
        actions
    }

    pub fn video(&self) -> Option<&VideoSource> {
        self.video.as_ref()
    }

    pub fn references(&self) -> &[ReferenceImage] {
        &self.references
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// What a report pane would show: the report, or the last analysis error.
    pub fn displayed_report(&self) -> Option<&str> {
        self.report.as_deref().or(self.report_error.as_deref())
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.chat
    }

    pub fn frames(&self) -> &[FrameSample] {
        &self.frames
    }

    pub fn stats(&self) -> Option<&AnalysisStats> {
        self.stats.as_ref()
    }
}
