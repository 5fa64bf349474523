use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use kiln_contracts::error::PipelineError;
use kiln_contracts::events::{EventWriter, SessionEvent};
use kiln_contracts::models::ModelSelector;
use kiln_contracts::request::{GenerationForm, GenerationRequest};
use reqwest::blocking::Client as HttpClient;

use crate::archive::{package_downloads, DownloadArtifact};
use crate::config::PipelineConfig;
use crate::materialize::{materialize_images, MaterializedImage};
use crate::queue::{FalQueueClient, GenerationProvider, QueueUpdate};
use crate::unix_timestamp;

pub const SUCCESS_STATUS: &str = "Images generated successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Submitting,
    Waiting,
    Completed,
    Failed,
    Downloading,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Submitting => "submitting",
            Stage::Waiting => "waiting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Downloading => "downloading",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    MissingCredential,
    InvalidOption,
    ProviderFailure,
    EmptyResult,
}

/// The three things a front end renders after a generation action: a status
/// line, the image set, and the paths that make the download available.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub kind: OutcomeKind,
    pub status: String,
    pub images: Option<Vec<MaterializedImage>>,
    pub paths: Option<Vec<PathBuf>>,
}

impl GenerationOutcome {
    fn success(images: Vec<MaterializedImage>) -> Self {
        let paths = images.iter().map(|image| image.path.clone()).collect();
        Self {
            kind: OutcomeKind::Success,
            status: SUCCESS_STATUS.to_string(),
            images: Some(images),
            paths: Some(paths),
        }
    }

    fn failure(err: &PipelineError) -> Self {
        let kind = match err {
            PipelineError::MissingCredential => OutcomeKind::MissingCredential,
            PipelineError::InvalidOption(_) => OutcomeKind::InvalidOption,
            PipelineError::ProviderFailure(_) => OutcomeKind::ProviderFailure,
            PipelineError::EmptyResult => OutcomeKind::EmptyResult,
        };
        Self {
            kind,
            status: err.to_string(),
            images: None,
            paths: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn download_available(&self) -> bool {
        self.paths.as_ref().is_some_and(|paths| !paths.is_empty())
    }
}

/// One user's generate-then-download cycle against a provider.
///
/// Holds the paths of the last successful generation so a later download
/// action can package them.
pub struct GenerationSession<P = FalQueueClient> {
    config: PipelineConfig,
    provider: P,
    http: HttpClient,
    selector: ModelSelector,
    events: Option<EventWriter>,
    stage: Stage,
    last_paths: Vec<PathBuf>,
}

impl GenerationSession<FalQueueClient> {
    pub fn new(config: PipelineConfig) -> Self {
        let provider = FalQueueClient::new(&config);
        Self::with_provider(config, provider)
    }
}

impl<P: GenerationProvider> GenerationSession<P> {
    pub fn with_provider(config: PipelineConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            http: HttpClient::new(),
            selector: ModelSelector::new(None),
            events: None,
            stage: Stage::Idle,
            last_paths: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn download_available(&self) -> bool {
        !self.last_paths.is_empty()
    }

    /// Run one generation action. Never fails: every error becomes the
    /// outcome's status line with no images or paths.
    pub fn generate(&mut self, form: &GenerationForm) -> GenerationOutcome {
        self.transition(Stage::Submitting);
        let outcome = match self.run(form) {
            Ok(images) => {
                self.transition(Stage::Completed);
                GenerationOutcome::success(images)
            }
            Err(err) => {
                if matches!(err, PipelineError::EmptyResult) {
                    self.transition(Stage::Completed);
                } else {
                    self.transition(Stage::Failed);
                }
                tracing::warn!(kind = err.kind(), "generation did not produce images: {err}");
                GenerationOutcome::failure(&err)
            }
        };
        self.last_paths = outcome.paths.clone().unwrap_or_default();
        self.transition(Stage::Idle);
        outcome
    }

    /// Package the paths of the last generation for download.
    pub fn download(&mut self) -> Result<DownloadArtifact> {
        if self.last_paths.is_empty() {
            return package_downloads(&[], &self.config.archive_dir, unix_timestamp());
        }
        self.transition(Stage::Downloading);
        let artifact =
            package_downloads(&self.last_paths, &self.config.archive_dir, unix_timestamp());
        if let Ok(DownloadArtifact::Archive(path)) = &artifact {
            self.record(SessionEvent::ArchiveCreated {
                path: path.clone(),
                files: self.last_paths.len(),
            });
        }
        self.transition(Stage::Idle);
        artifact
    }

    fn run(&mut self, form: &GenerationForm) -> Result<Vec<MaterializedImage>, PipelineError> {
        let request = GenerationRequest::from_form(form, &self.selector)?;
        let document = request.document();
        tracing::info!(
            model = %request.model_id,
            image_size = %request.image_size,
            num_images = request.num_images,
            "submitting generation request"
        );

        self.transition(Stage::Waiting);
        let events = self.events.clone();
        let mut on_update = |update: &QueueUpdate| log_queue_update(events.as_ref(), update);
        let result = self
            .provider
            .submit_and_wait(&request.model_id, &document, &request.api_key, &mut on_update)
            .map_err(PipelineError::ProviderFailure)?;

        let events = self.events.clone();
        let images = materialize_images(
            &self.http,
            &result,
            &self.config.output_dir,
            unix_timestamp(),
            |image| {
                tracing::info!(path = %image.path.display(), "saved image");
                record_event(
                    events.as_ref(),
                    SessionEvent::ImageSaved {
                        path: image.path.clone(),
                        source_url: image.source_url.clone(),
                    },
                );
            },
        )
        .map_err(PipelineError::ProviderFailure)?;

        if images.is_empty() {
            return Err(PipelineError::EmptyResult);
        }
        Ok(images)
    }

    fn transition(&mut self, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "stage changed");
        let from = self.stage;
        self.stage = stage;
        self.record(SessionEvent::StageChanged {
            from: from.as_str().to_string(),
            stage: stage.as_str().to_string(),
        });
    }

    fn record(&self, event: SessionEvent) {
        record_event(self.events.as_ref(), event);
    }
}

fn log_queue_update(events: Option<&EventWriter>, update: &QueueUpdate) {
    match update {
        QueueUpdate::Queued { position } => {
            tracing::info!(position = ?position, "request queued");
        }
        QueueUpdate::InProgress { logs } | QueueUpdate::Completed { logs } => {
            tracing::info!(status = update.status(), "queue update");
            for line in logs {
                tracing::info!("provider: {line}");
            }
        }
    }
    let queue_position = match update {
        QueueUpdate::Queued { position } => *position,
        _ => None,
    };
    record_event(
        events,
        SessionEvent::QueueUpdate {
            status: update.status().to_string(),
            queue_position,
            logs: update.logs().to_vec(),
        },
    );
}

fn record_event(events: Option<&EventWriter>, event: SessionEvent) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.record(&event) {
        tracing::warn!("failed to record {} event: {err:#}", event.kind());
    }
}
