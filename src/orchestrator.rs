// orchestrator.rs — Drives capture → prompt → provider → session.
//
// Every request takes the next id from the session's generation counter.
// Results, status lines and progress ticks are applied only while that id is
// still current; anything older is logged and dropped.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;

use crate::ai::{
    build_provider, AgentEvent, AgentStream, ProviderError, ProviderKind, ProviderRequest,
    VisionProvider,
};
use crate::capture::ffmpeg::FfmpegDecoderFactory;
use crate::capture::{sample_frames, DecoderFactory, FrameSample, SamplingError, VideoSource};
use crate::error::{InputError, InspectorError, OrchestrationError};
use crate::prompts;
use crate::session::{ChatTurn, Phase, ReferenceImage, Session};
use crate::settings::Settings;
use crate::stats::AnalysisStats;

const STATUS_READY: &str = "Ready";
const STATUS_KEY_MISSING: &str = "API Key Missing";

/// Progress checkpoints, in percent.
const PROGRESS_PREPARING: u8 = 10;
const PROGRESS_SAMPLING_SPAN: f32 = 30.0;
const PROGRESS_ASSEMBLED: u8 = 50;
const PROGRESS_DISPATCHED: u8 = 60;
const PROGRESS_STREAM_CAP: u8 = 99;

/// Which remote task a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Analyze,
    Chat,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Analyze => "ANALYZE",
            Capability::Chat => "CHAT",
        })
    }
}

/// A fully assembled request, ready for dispatch.
#[derive(Debug, Clone)]
pub enum AgentRequest {
    Analyze {
        video: VideoSource,
        frames: Vec<FrameSample>,
        references: Vec<ReferenceImage>,
        interval_secs: u32,
    },
    Chat {
        history: Vec<ChatTurn>,
        report: Option<String>,
        question: String,
    },
}

impl AgentRequest {
    pub fn capability(&self) -> Capability {
        match self {
            AgentRequest::Analyze { .. } => Capability::Analyze,
            AgentRequest::Chat { .. } => Capability::Chat,
        }
    }
}

/// Everything a presentation layer needs to follow along.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InspectorEvent {
    Progress { request_id: u64, value: u8 },
    Status { request_id: u64, text: String },
    Phase { request_id: u64, phase: Phase },
    /// The report pane content; `is_error` marks an "Analysis Error: …" text.
    Report { request_id: u64, text: String, is_error: bool },
    Chat { request_id: u64, turn: ChatTurn },
    Stats { request_id: u64, stats: AnalysisStats },
    Error { request_id: u64, kind: &'static str, message: String },
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// A newer request, upload or reconfiguration took over; nothing was applied.
    Superseded,
}

/// Immutable per-configuration half of the pipeline: the provider and the
/// decoder factory built from one `Settings` value.
pub struct Orchestrator {
    settings: Settings,
    provider: Option<Arc<dyn VisionProvider>>,
    decoders: Arc<dyn DecoderFactory>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        let provider = build_provider(&settings);
        let decoders = Arc::new(FfmpegDecoderFactory::new(
            &settings.ffmpeg_path,
            &settings.ffprobe_path,
        ));
        Self::with_parts(settings, provider, decoders)
    }

    pub fn with_parts(
        settings: Settings,
        provider: Option<Arc<dyn VisionProvider>>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Self {
        Self {
            settings,
            provider,
            decoders,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// The provider, or the missing-credential error for the selected backend.
    pub fn provider(&self) -> Result<Arc<dyn VisionProvider>, InputError> {
        self.provider
            .as_ref()
            .map(Arc::clone)
            .ok_or(InputError::MissingCredential {
                provider: self.settings.provider,
            })
    }

    /// Sample the video with a fresh decoder. An empty sequence is an error here.
    pub async fn sample<F>(
        &self,
        video: &VideoSource,
        on_progress: F,
    ) -> Result<Vec<FrameSample>, SamplingError>
    where
        F: FnMut(f32) + Send,
    {
        let mut decoder = self.decoders.open(video).await?;
        let config = self.settings.sampler_config();
        let frames = sample_frames(&mut *decoder, &config, on_progress).await?;
        if frames.is_empty() {
            return Err(SamplingError::NoFrames);
        }
        Ok(frames)
    }

    pub fn build_prompt(&self, request: &AgentRequest) -> String {
        match request {
            AgentRequest::Analyze {
                frames,
                references,
                interval_secs,
                ..
            } => {
                let names: Vec<&str> = references.iter().map(|r| r.name.as_str()).collect();
                prompts::analysis_prompt(
                    self.settings.provider.ingestion(),
                    *interval_secs,
                    frames.len(),
                    &names,
                )
            }
            AgentRequest::Chat {
                history,
                report,
                question,
            } => prompts::chat_prompt(report.as_deref(), history, question),
        }
    }

    /// Send the request and consume its stream, bounded by the request timeout.
    pub async fn dispatch<F>(
        &self,
        request: &AgentRequest,
        on_progress: F,
    ) -> Result<String, InspectorError>
    where
        F: FnMut(String) + Send,
    {
        let provider = self.provider()?;
        let prompt = self.build_prompt(request);
        let provider_request = match request {
            AgentRequest::Analyze {
                video,
                frames,
                references,
                ..
            } => ProviderRequest {
                prompt: &prompt,
                video: Some(video),
                frames,
                references,
            },
            AgentRequest::Chat { .. } => ProviderRequest::text(&prompt),
        };

        let capability = request.capability();
        log::info!(
            "Dispatching {} to {} ({} chars of prompt)",
            capability,
            provider.name(),
            prompt.len()
        );

        let run = async {
            let stream = provider.invoke_stream(&provider_request).await?;
            let text = consume_stream(capability, stream, on_progress).await?;
            Ok::<String, InspectorError>(text)
        };

        match tokio::time::timeout(self.settings.request_timeout(), run).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.settings.request_timeout_secs).into()),
        }
    }
}

/// Read a capability stream until its first `Final` or `Error`.
///
/// `Progress` increments go to `on_progress` and nothing else. A stream that
/// closes without a `Final` is a [`OrchestrationError::NoOutput`].
pub async fn consume_stream<F>(
    capability: Capability,
    mut stream: AgentStream,
    mut on_progress: F,
) -> Result<String, InspectorError>
where
    F: FnMut(String) + Send,
{
    while let Some(event) = stream.recv().await {
        match event {
            AgentEvent::Progress(status) => on_progress(status),
            AgentEvent::Final(text) => return Ok(text),
            AgentEvent::Error(e) => return Err(e.into()),
        }
    }
    log::warn!("{capability} stream ended without a final output");
    Err(OrchestrationError::NoOutput(capability).into())
}

/// The application facade: session state, the current orchestrator and the
/// outbound event channel.
pub struct Inspector {
    orchestrator: RwLock<Arc<Orchestrator>>,
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<InspectorEvent>,
}

impl Inspector {
    /// Build with the production provider and the ffmpeg decoder.
    pub fn new(
        settings: Settings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InspectorEvent>), InputError> {
        settings.validate()?;
        Ok(Self::from_orchestrator(Orchestrator::new(settings)))
    }

    /// Build from explicit parts (tests, alternative decoders).
    pub fn with_parts(
        settings: Settings,
        provider: Option<Arc<dyn VisionProvider>>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InspectorEvent>), InputError> {
        settings.validate()?;
        Ok(Self::from_orchestrator(Orchestrator::with_parts(
            settings, provider, decoders,
        )))
    }

    fn from_orchestrator(
        orchestrator: Orchestrator,
    ) -> (Self, mpsc::UnboundedReceiver<InspectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = idle_status(&orchestrator);
        let inspector = Self {
            orchestrator: RwLock::new(Arc::new(orchestrator)),
            session: Mutex::new(Session::new(status)),
            events: tx,
        };
        (inspector, rx)
    }

    /// Replace the configuration. Anything in flight is superseded.
    pub fn reconfigure(&self, settings: Settings) -> Result<(), InputError> {
        settings.validate()?;
        self.install(Orchestrator::new(settings));
        Ok(())
    }

    pub fn reconfigure_with(
        &self,
        settings: Settings,
        provider: Option<Arc<dyn VisionProvider>>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Result<(), InputError> {
        settings.validate()?;
        self.install(Orchestrator::with_parts(settings, provider, decoders));
        Ok(())
    }

    fn install(&self, orchestrator: Orchestrator) {
        let status = idle_status(&orchestrator);
        let provider = orchestrator.settings().provider;
        {
            let mut current = self
                .orchestrator
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = Arc::new(orchestrator);
        }
        let mut session = self.lock_session();
        session.bump_generation();
        session.status = status.to_string();
        log::info!(
            "Reconfigured for {} (generation {})",
            provider,
            session.generation()
        );
    }

    fn orchestrator(&self) -> Arc<Orchestrator> {
        let guard = self
            .orchestrator
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: InspectorEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    pub fn set_video(&self, video: VideoSource) {
        log::info!(
            "Video loaded: {} ({}, {} bytes)",
            video.name,
            video.mime_type,
            video.bytes().len()
        );
        self.lock_session().set_video(video);
    }

    pub fn add_reference(&self, image: ReferenceImage) {
        log::info!("Reference image added: {}", image.name);
        self.lock_session().add_reference(image);
    }

    pub fn remove_reference(&self, index: usize) -> Result<ReferenceImage, InputError> {
        let removed = self.lock_session().remove_reference(index)?;
        log::info!("Reference image removed: {}", removed.name);
        Ok(removed)
    }

    pub fn start_new_chat(&self) {
        self.lock_session().start_new_chat();
    }

    /// Run one analysis of the current video against the current references.
    ///
    /// Missing inputs come back as `Err` before anything changes. Every later
    /// failure lands in the session and comes back as `Outcome::Failed`.
    pub async fn analyze(&self) -> Result<Outcome, InputError> {
        let orchestrator = self.orchestrator();
        let (video, references) = {
            let session = self.lock_session();
            let video = session.video().cloned().ok_or(InputError::MissingVideo)?;
            if session.references().is_empty() {
                return Err(InputError::MissingReferences);
            }
            (video, session.references().to_vec())
        };
        let provider = orchestrator.provider()?;
        let kind = provider.kind();
        let reference_count = references.len();

        let id = self.begin(Capability::Analyze, "Extracting frames...")?;

        let sampled = orchestrator
            .sample(&video, |fraction| {
                let value = PROGRESS_PREPARING + (fraction * PROGRESS_SAMPLING_SPAN).round() as u8;
                self.advance_progress(id, value);
            })
            .await;
        let frames = match sampled {
            Ok(frames) => frames,
            Err(e) => return Ok(self.finish_analysis(id, Err(e.into()), 0, reference_count, kind)),
        };
        let frame_count = frames.len();
        if !self.apply(id, |session| {
            session.set_frames(frames.clone());
            Vec::new()
        }) {
            return Ok(self.superseded(Capability::Analyze, id));
        }

        let request = AgentRequest::Analyze {
            video,
            frames,
            references,
            interval_secs: orchestrator.settings().frame_interval,
        };
        self.advance_progress(id, PROGRESS_ASSEMBLED);
        self.enter_dispatch(id, format!("Performing analysis with {}...", kind.display_name()));

        let result = orchestrator
            .dispatch(&request, |status| self.stream_progress(id, status))
            .await;
        Ok(self.finish_analysis(id, result, frame_count, reference_count, kind))
    }

    /// Ask a follow-up question about the current report.
    ///
    /// Without a report the answer is given locally and nothing is sent.
    pub async fn ask(&self, question: &str) -> Result<Outcome, InputError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InputError::EmptyQuestion);
        }
        let orchestrator = self.orchestrator();
        let (report, history) = {
            let session = self.lock_session();
            if session.phase.is_busy() {
                return Err(InputError::Busy);
            }
            (
                session.report().map(str::to_string),
                session.transcript().to_vec(),
            )
        };

        let Some(report) = report else {
            let mut session = self.lock_session();
            let request_id = session.generation();
            for turn in [
                ChatTurn::user(question),
                ChatTurn::assistant(prompts::NO_ANALYSIS_REPLY),
            ] {
                session.push_turn(turn.clone());
                self.emit(InspectorEvent::Chat { request_id, turn });
            }
            log::info!("Question asked before any analysis; answered without a provider call");
            return Ok(Outcome::Completed);
        };

        let provider = orchestrator.provider()?;
        let id = self.begin(Capability::Chat, "Thinking...")?;
        self.apply(id, |session| {
            let turn = ChatTurn::user(question);
            session.push_turn(turn.clone());
            vec![InspectorEvent::Chat { request_id: id, turn }]
        });

        let request = AgentRequest::Chat {
            history,
            report: Some(report),
            question: question.to_string(),
        };
        self.advance_progress(id, PROGRESS_ASSEMBLED);
        self.enter_dispatch(id, format!("Asking {}...", provider.kind().display_name()));

        let result = orchestrator
            .dispatch(&request, |status| self.stream_progress(id, status))
            .await;
        Ok(self.finish_chat(id, result))
    }

    /// Mark `id` as the current request and enter PREPARING.
    /// Claim the single request slot. Fails while another request is busy.
    fn begin(&self, capability: Capability, status: &str) -> Result<u64, InputError> {
        let mut session = self.lock_session();
        if session.phase.is_busy() {
            log::warn!(
                "{capability} request rejected: request {} is still running",
                session.generation()
            );
            return Err(InputError::Busy);
        }
        let id = session.begin_request();
        session.phase = Phase::Preparing;
        session.progress = PROGRESS_PREPARING;
        session.status = status.to_string();
        session.last_error = None;
        log::info!("{capability} request {id} started");
        self.emit(InspectorEvent::Phase {
            request_id: id,
            phase: Phase::Preparing,
        });
        self.emit(InspectorEvent::Progress {
            request_id: id,
            value: PROGRESS_PREPARING,
        });
        self.emit(InspectorEvent::Status {
            request_id: id,
            text: status.to_string(),
        });
        Ok(id)
    }

    /// Run `update` only if `id` is still current. Events are sent while the
    /// session is locked so they arrive in the order the changes were made.
    fn apply<F>(&self, id: u64, update: F) -> bool
    where
        F: FnOnce(&mut Session) -> Vec<InspectorEvent>,
    {
        let mut session = self.lock_session();
        if !session.is_current(id) {
            return false;
        }
        for event in update(&mut session) {
            self.emit(event);
        }
        true
    }

    fn advance_progress(&self, id: u64, value: u8) {
        self.apply(id, |session| progress_to(session, id, value).into_iter().collect());
    }

    fn enter_dispatch(&self, id: u64, status: String) {
        self.apply(id, |session| {
            session.phase = Phase::Dispatched;
            session.status = status.clone();
            let mut events = vec![
                InspectorEvent::Phase {
                    request_id: id,
                    phase: Phase::Dispatched,
                },
                InspectorEvent::Status {
                    request_id: id,
                    text: status,
                },
            ];
            events.extend(progress_to(session, id, PROGRESS_DISPATCHED));
            events
        });
    }

    /// One intermediate increment: status line plus one percent, capped.
    fn stream_progress(&self, id: u64, status: String) {
        let applied = self.apply(id, |session| {
            session.status = status.clone();
            let next = session.progress.saturating_add(1).min(PROGRESS_STREAM_CAP);
            let mut events = vec![InspectorEvent::Status {
                request_id: id,
                text: status,
            }];
            events.extend(progress_to(session, id, next));
            events
        });
        if !applied {
            log::debug!("Ignoring progress for stale request {id}");
        }
    }

    fn superseded(&self, capability: Capability, id: u64) -> Outcome {
        log::warn!(
            "Dropping {capability} result for request {id}; generation is now {}",
            self.lock_session().generation()
        );
        Outcome::Superseded
    }

    fn finish_analysis(
        &self,
        id: u64,
        result: Result<String, InspectorError>,
        frame_count: usize,
        reference_count: usize,
        kind: ProviderKind,
    ) -> Outcome {
        let mut session = self.lock_session();
        if !session.is_current(id) {
            drop(session);
            return self.superseded(Capability::Analyze, id);
        }

        match result {
            Ok(report) => {
                let stats = AnalysisStats::from_report(&report, kind, frame_count, reference_count);
                log::info!(
                    "Analysis request {id} complete: {} chars, {} frames, compliance {}",
                    report.len(),
                    frame_count,
                    stats.compliance_score
                );
                session.complete_analysis(report.clone(), stats.clone());
                session.status = "Analysis Complete".into();
                session.progress = 100;
                self.emit(InspectorEvent::Progress {
                    request_id: id,
                    value: 100,
                });
                self.emit(InspectorEvent::Report {
                    request_id: id,
                    text: report,
                    is_error: false,
                });
                self.emit(InspectorEvent::Stats {
                    request_id: id,
                    stats,
                });
                if let Some(turn) = session.transcript().last().cloned() {
                    self.emit(InspectorEvent::Chat { request_id: id, turn });
                }
                self.settle(&mut session, id, Phase::Complete);
                Outcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Analysis request {id} failed ({}): {message}", e.kind());
                session.fail_analysis(&message);
                session.status = "Analysis Error".into();
                if let Some(text) = session.displayed_report() {
                    self.emit(InspectorEvent::Report {
                        request_id: id,
                        text: text.to_string(),
                        is_error: true,
                    });
                }
                if let Some(turn) = session.transcript().last().cloned() {
                    self.emit(InspectorEvent::Chat { request_id: id, turn });
                }
                self.emit(InspectorEvent::Error {
                    request_id: id,
                    kind: e.kind(),
                    message: message.clone(),
                });
                self.settle(&mut session, id, Phase::Failed);
                Outcome::Failed(message)
            }
        }
    }

    fn finish_chat(&self, id: u64, result: Result<String, InspectorError>) -> Outcome {
        let mut session = self.lock_session();
        if !session.is_current(id) {
            drop(session);
            return self.superseded(Capability::Chat, id);
        }

        let (turn, phase, outcome) = match result {
            Ok(answer) => {
                log::info!("Chat request {id} answered ({} chars)", answer.len());
                session.status = STATUS_READY.into();
                session.progress = 100;
                self.emit(InspectorEvent::Progress {
                    request_id: id,
                    value: 100,
                });
                (ChatTurn::assistant(answer), Phase::Complete, Outcome::Completed)
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Chat request {id} failed ({}): {message}", e.kind());
                session.status = "Chat Error".into();
                session.last_error = Some(message.clone());
                self.emit(InspectorEvent::Error {
                    request_id: id,
                    kind: e.kind(),
                    message: message.clone(),
                });
                (
                    ChatTurn::assistant(format!("Chat Error: {message}")),
                    Phase::Failed,
                    Outcome::Failed(message),
                )
            }
        };
        session.push_turn(turn.clone());
        self.emit(InspectorEvent::Chat { request_id: id, turn });
        self.settle(&mut session, id, phase);
        outcome
    }

    /// Terminal phase, then back to IDLE with progress reset.
    fn settle(&self, session: &mut Session, id: u64, terminal: Phase) {
        self.emit(InspectorEvent::Status {
            request_id: id,
            text: session.status.clone(),
        });
        for phase in [terminal, Phase::Idle] {
            session.phase = phase;
            self.emit(InspectorEvent::Phase {
                request_id: id,
                phase,
            });
        }
        session.progress = 0;
        self.emit(InspectorEvent::Progress {
            request_id: id,
            value: 0,
        });
    }

    pub fn settings(&self) -> Settings {
        self.orchestrator().settings().clone()
    }

    pub fn is_configured(&self) -> bool {
        self.orchestrator().is_configured()
    }

    pub fn report(&self) -> Option<String> {
        self.lock_session().report().map(str::to_string)
    }

    /// The report, or the error text of the last failed analysis.
    pub fn displayed_report(&self) -> Option<String> {
        self.lock_session().displayed_report().map(str::to_string)
    }

    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.lock_session().transcript().to_vec()
    }

    pub fn quick_actions(&self) -> Vec<&'static str> {
        self.lock_session().quick_actions()
    }

    pub fn stats(&self) -> Option<AnalysisStats> {
        self.lock_session().stats().cloned()
    }

    pub fn frames(&self) -> Vec<FrameSample> {
        self.lock_session().frames().to_vec()
    }

    pub fn references(&self) -> Vec<ReferenceImage> {
        self.lock_session().references().to_vec()
    }

    pub fn status(&self) -> String {
        self.lock_session().status.clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock_session().progress
    }

    pub fn phase(&self) -> Phase {
        self.lock_session().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_session().last_error.clone()
    }
}

fn idle_status(orchestrator: &Orchestrator) -> &'static str {
    if orchestrator.is_configured() {
        STATUS_READY
    } else {
        STATUS_KEY_MISSING
    }
}

/// Raise progress to `value`; never lowers it.
fn progress_to(session: &mut Session, id: u64, value: u8) -> Option<InspectorEvent> {
    if value <= session.progress {
        return None;
    }
    session.progress = value;
    Some(InspectorEvent::Progress {
        request_id: id,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::single_event_stream;
    use crate::capture::MediaDecoder;
    use async_trait::async_trait;

    struct NoDecoder;

    #[async_trait]
    impl DecoderFactory for NoDecoder {
        async fn open(&self, _video: &VideoSource) -> Result<Box<dyn MediaDecoder>, SamplingError> {
            Err(SamplingError::Decoder("no decoder in unit tests".into()))
        }
    }

    fn orchestrator(settings: Settings) -> Orchestrator {
        Orchestrator::with_parts(settings, None, Arc::new(NoDecoder))
    }

    #[test]
    fn capability_names() {
        assert_eq!(Capability::Analyze.to_string(), "ANALYZE");
        assert_eq!(Capability::Chat.to_string(), "CHAT");
        let chat = AgentRequest::Chat {
            history: vec![],
            report: None,
            question: "q".into(),
        };
        assert_eq!(chat.capability(), Capability::Chat);
    }

    #[tokio::test]
    async fn stream_stops_at_first_final() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AgentEvent::Progress("thinking".into())).await.unwrap();
        tx.send(AgentEvent::Final("report".into())).await.unwrap();
        tx.send(AgentEvent::Final("ignored".into())).await.unwrap();
        drop(tx);

        let mut seen = Vec::new();
        let text = consume_stream(Capability::Analyze, rx, |s| seen.push(s))
            .await
            .unwrap();
        assert_eq!(text, "report");
        assert_eq!(seen, vec!["thinking".to_string()]);
    }

    #[tokio::test]
    async fn stream_error_stops_consumption() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AgentEvent::Error(ProviderError::Connection("reset".into())))
            .await
            .unwrap();
        tx.send(AgentEvent::Final("too late".into())).await.unwrap();
        drop(tx);

        let err = consume_stream(Capability::Chat, rx, |_| {}).await.unwrap_err();
        assert!(matches!(err, InspectorError::Provider(ProviderError::Connection(_))));
    }

    #[tokio::test]
    async fn progress_only_stream_has_no_output() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(AgentEvent::Progress("a".into())).await.unwrap();
        tx.send(AgentEvent::Progress("b".into())).await.unwrap();
        drop(tx);

        let err = consume_stream(Capability::Analyze, rx, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            InspectorError::Orchestration(OrchestrationError::NoOutput(Capability::Analyze))
        ));
        assert_eq!(err.to_string(), "The ANALYZE capability produced no output");
    }

    #[tokio::test]
    async fn single_event_stream_is_consumed() {
        let text = consume_stream(Capability::Chat, single_event_stream(Ok("hi".into())), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "hi");
    }

    #[tokio::test]
    async fn dispatch_without_provider_is_missing_credential() {
        let orch = orchestrator(Settings::default());
        let request = AgentRequest::Chat {
            history: vec![],
            report: Some("r".into()),
            question: "q".into(),
        };
        let err = orch.dispatch(&request, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            InspectorError::Input(InputError::MissingCredential { .. })
        ));
    }

    #[test]
    fn analyze_prompt_follows_selected_provider() {
        let video = VideoSource::new("line.mp4", "video/mp4", vec![0]).unwrap();
        let reference = ReferenceImage::new("sop.png", "image/png", vec![0]).unwrap();
        let request = AgentRequest::Analyze {
            video,
            frames: vec![],
            references: vec![reference],
            interval_secs: 4,
        };

        let openai = Settings {
            provider: ProviderKind::OpenAi,
            ..Settings::default()
        };
        let prompt = orchestrator(openai).build_prompt(&request);
        assert!(prompt.contains("Compliance Checklist"));
        assert!(prompt.contains("sop.png"));

        let prompt = orchestrator(Settings::default()).build_prompt(&request);
        assert!(!prompt.contains("Compliance Checklist"));
        assert!(prompt.contains("every 4 seconds"));
    }

    #[test]
    fn progress_never_moves_backwards() {
        let mut session = Session::default();
        let id = session.begin_request();
        assert!(progress_to(&mut session, id, 40).is_some());
        assert!(progress_to(&mut session, id, 30).is_none());
        assert!(progress_to(&mut session, id, 40).is_none());
        assert_eq!(session.progress, 40);
    }
}
