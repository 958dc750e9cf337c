use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use atelier_contracts::credentials::{CredentialChain, CredentialKind};
use atelier_contracts::events::{EventPayload, EventWriter};
use atelier_contracts::media::{ImagePayload, ImageRef};
use atelier_contracts::outfit::{GarmentSlot, Garments, PoseSpec, POSES};
use atelier_contracts::receipts::{build_receipt, write_receipt, LookbookReceipt, PoseRecord};
use atelier_contracts::status::{AppStatus, GenerationResult, VideoArtifact};
use atelier_contracts::TryOnError;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Map, Value};

use crate::compositor::Compositor;
use crate::config::EngineConfig;
use crate::ingest::{self, Ingestor};
use crate::orchestrator::{generate_poses, PoseObserver, Schedule};
use crate::providers::{default_registry, map_object, ProviderRegistry};
use crate::video::{CancelToken, PollPolicy, VideoOrchestrator, VideoProvider, VideoState};

pub const GRID_FILE: &str = "lookbook-grid.png";
/// The video is saved as `lookbook.<ext>`, with the extension taken from
/// the downloaded MIME type.
pub const VIDEO_STEM: &str = "lookbook";
pub const RECEIPT_FILE: &str = "receipt.json";
pub const EVENTS_FILE: &str = "events.jsonl";

/// Which image the video is rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoSource {
    #[default]
    Composite,
    /// Zero-based pose index.
    Pose(usize),
}

/// One try-on session: inputs, status, and the artifacts of the current
/// cycle, written under `run_dir`.
pub struct Session {
    session_id: String,
    run_dir: PathBuf,
    credentials: CredentialChain,
    providers: ProviderRegistry,
    compositor: Compositor,
    ingestor: Ingestor,
    events: EventWriter,
    schedule: Schedule,
    status: AppStatus,
    person: Option<ImagePayload>,
    garments: Garments,
    result: GenerationResult,
    provider_name: Option<String>,
    warnings: Vec<String>,
    last_error: Option<String>,
    started: bool,
}

impl Session {
    /// A session with the default backends, system fonts and a JSONL event
    /// log in `run_dir`.
    pub fn new(
        config: &EngineConfig,
        credentials: CredentialChain,
        run_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let events = EventWriter::new(run_dir.join(EVENTS_FILE), session_id.clone());
        let providers = default_registry(config, &credentials);
        Ok(Self {
            session_id,
            run_dir,
            credentials,
            providers,
            compositor: Compositor::new(),
            ingestor: Ingestor::new(),
            events,
            schedule: Schedule::Sequential,
            status: AppStatus::Idle,
            person: None,
            garments: Garments::default(),
            result: GenerationResult::default(),
            provider_name: None,
            warnings: Vec::new(),
            last_error: None,
            started: false,
        })
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_compositor(mut self, compositor: Compositor) -> Self {
        self.compositor = compositor;
        self
    }

    /// Replace the event sink. The session id follows the writer's.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.session_id = events.session_id().to_string();
        self.events = events;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn result(&self) -> &GenerationResult {
        &self.result
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn person(&self) -> Option<&ImagePayload> {
        self.person.as_ref()
    }

    pub fn garments(&self) -> &Garments {
        &self.garments
    }

    pub fn set_person(&mut self, person: Option<ImagePayload>) {
        self.person = person;
    }

    pub fn set_garment(&mut self, slot: GarmentSlot, garment: Option<ImagePayload>) {
        self.garments.set(slot, garment);
    }

    /// Render the four poses with `provider_name`, save them, and compose
    /// the grid.
    ///
    /// Inputs and the provider's key are checked before any call is made;
    /// those failures leave the status untouched. Failures after that set
    /// [`AppStatus::Error`].
    pub fn generate(&mut self, provider_name: &str) -> Result<&GenerationResult> {
        if let Err(err) = self.preflight(provider_name) {
            self.last_error = Some(err.to_string());
            return Err(err.into());
        }

        self.status = AppStatus::GeneratingImage;
        self.result = GenerationResult::default();
        self.warnings.clear();
        self.last_error = None;
        self.provider_name = Some(provider_name.to_string());

        match self.run_generation(provider_name) {
            Ok(()) => {
                self.status = AppStatus::ImageReady;
                self.write_receipt()?;
                Ok(&self.result)
            }
            Err(err) => {
                self.status = AppStatus::Error;
                self.result = GenerationResult::default();
                self.last_error = Some(format!("{err:#}"));
                let mut payload = EventPayload::new();
                payload.insert("provider".to_string(), json!(provider_name));
                payload.insert("error".to_string(), json!(format!("{err:#}")));
                self.emit("generation_failed", payload)?;
                Err(err)
            }
        }
    }

    fn preflight(&self, provider_name: &str) -> Result<(), TryOnError> {
        if self.status.is_busy() {
            return Err(TryOnError::validation(format!(
                "session is busy ({})",
                self.status.as_str()
            )));
        }
        if self.person.is_none() {
            return Err(TryOnError::validation("Please upload a photo of yourself."));
        }
        if self.garments.is_empty() {
            return Err(TryOnError::validation(
                "Please select at least one clothing item.",
            ));
        }
        let Some(provider) = self.providers.get(provider_name) else {
            return Err(TryOnError::validation(format!(
                "unknown provider '{provider_name}' (available: {})",
                self.providers.names().join(", ")
            )));
        };
        self.require_credential(provider.credential())
    }

    fn require_credential(&self, kind: Option<CredentialKind>) -> Result<(), TryOnError> {
        if let Some(kind) = kind {
            self.credentials.require(kind)?;
        }
        Ok(())
    }

    fn run_generation(&mut self, provider_name: &str) -> Result<()> {
        let Some(provider) = self.providers.get(provider_name) else {
            return Err(TryOnError::validation(format!("unknown provider '{provider_name}'")).into());
        };
        let mut payload = EventPayload::new();
        payload.insert("provider".to_string(), json!(provider.name()));
        payload.insert("model".to_string(), json!(provider.model()));
        payload.insert("schedule".to_string(), json!(self.schedule.as_str()));
        payload.insert(
            "garments".to_string(),
            json!(self
                .garments
                .present()
                .map(|(slot, _)| slot.as_str())
                .collect::<Vec<_>>()),
        );
        self.emit("generation_started", payload)?;
        self.clear_artifacts()?;

        let (Some(person), Some(provider)) = (self.person.as_ref(), self.providers.get(provider_name))
        else {
            return Err(TryOnError::validation("Please upload a photo of yourself.").into());
        };
        let observer = EventObserver::new(&self.events, provider.name());
        let images = generate_poses(provider, person, &self.garments, self.schedule, &observer);
        self.warnings.extend(observer.take_failures());
        let images = images?;
        self.result.image_urls = images.clone();

        // Nothing is written until every pose decodes and the grid composes.
        let mut decoded = Vec::with_capacity(images.len());
        for (pose, image) in POSES.iter().zip(images.iter()) {
            decoded.push(self.load_pose(pose, image)?);
        }
        let composite = self.compositor.compose_decoded(&decoded)?;

        for (pose, pixels) in POSES.iter().zip(decoded.iter()) {
            let path = self.write_pose(pose, pixels)?;
            self.result.pose_paths.push(path);
        }
        let artifact = composite.write_to(&self.run_dir.join(GRID_FILE))?;
        self.warnings.extend(composite.warnings.iter().cloned());

        let mut payload = EventPayload::new();
        payload.insert(
            "path".to_string(),
            json!(artifact.path.to_string_lossy()),
        );
        payload.insert("width".to_string(), json!(artifact.width));
        payload.insert("height".to_string(), json!(artifact.height));
        payload.insert("labels".to_string(), json!(composite.labels));
        payload.insert("warnings".to_string(), json!(composite.warnings));
        self.result.composite = Some(artifact);
        self.emit("composite_created", payload)?;
        Ok(())
    }

    fn load_pose(&self, pose: &PoseSpec, image: &ImageRef) -> Result<DynamicImage> {
        let pixels = self
            .ingestor
            .load(image.as_str())
            .and_then(|payload| {
                image::load_from_memory(payload.bytes()).context("image decode failed")
            })
            .map_err(|err| {
                TryOnError::composite(format!(
                    "failed to load pose {} image ({image}): {err:#}",
                    pose.index + 1
                ))
            })?;
        Ok(pixels)
    }

    fn pose_path(&self, pose: &PoseSpec) -> PathBuf {
        self.run_dir
            .join(format!("pose-{}-{}.png", pose.index + 1, pose.slug))
    }

    fn write_pose(&self, pose: &PoseSpec, pixels: &DynamicImage) -> Result<PathBuf> {
        let path = self.pose_path(pose);
        let mut out = Cursor::new(Vec::new());
        pixels
            .write_to(&mut out, ImageFormat::Png)
            .context("pose PNG encode failed")?;
        std::fs::write(&path, out.into_inner())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Remove poses, grid, video and receipt left by an earlier cycle in the
    /// same run directory. The event log is kept.
    fn clear_artifacts(&self) -> Result<()> {
        let mut stale = vec![self.run_dir.join(GRID_FILE), self.run_dir.join(RECEIPT_FILE)];
        stale.extend(POSES.iter().map(|pose| self.pose_path(pose)));
        let entries = std::fs::read_dir(&self.run_dir)
            .with_context(|| format!("failed to list {}", self.run_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.file_stem().is_some_and(|stem| stem == VIDEO_STEM) {
                stale.push(path);
            }
        }
        for path in stale {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to remove stale {}", path.display()))
                }
            }
        }
        Ok(())
    }

    /// Animate the composite (or one pose) into `lookbook.<ext>`.
    ///
    /// Requires a finished lookbook. A failure puts the session back to
    /// [`AppStatus::ImageReady`] with every image artifact intact.
    pub fn generate_video(
        &mut self,
        provider: &dyn VideoProvider,
        source: VideoSource,
        policy: PollPolicy,
        cancel: CancelToken,
    ) -> Result<&VideoArtifact> {
        let image = match self.video_input(source) {
            Ok(path) => path,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };
        if let Err(err) = self.require_credential(provider.credential()) {
            self.last_error = Some(err.to_string());
            return Err(err.into());
        }

        self.status = AppStatus::GeneratingVideo;
        self.last_error = None;
        let events = self.events.clone();
        let mut event_failures = Vec::new();
        let mut observe = |state: VideoState, polls: u32| {
            let mut payload = EventPayload::new();
            payload.insert("state".to_string(), json!(state.as_str()));
            payload.insert("polls".to_string(), json!(polls));
            if let Err(err) = events.emit("video_state", payload) {
                event_failures.push(event_failure("video_state", &err));
            }
        };
        let outcome = ingest::from_path(&image).and_then(|payload| {
            VideoOrchestrator::new(policy, cancel).run_with_observer(
                provider,
                &payload,
                &mut observe,
            )
        });
        self.warnings.extend(event_failures);
        let written = outcome.and_then(|outcome| {
            let extension = ingest::extension_for_mime(&outcome.video.mime_type);
            outcome.write_to(&self.run_dir.join(format!("{VIDEO_STEM}.{extension}")))
        });

        match written {
            Ok(artifact) => {
                let mut payload = EventPayload::new();
                payload.insert("provider".to_string(), json!(provider.name()));
                payload.insert(
                    "path".to_string(),
                    json!(artifact.path.to_string_lossy()),
                );
                payload.insert("bytes".to_string(), json!(artifact.bytes));
                self.emit("video_ready", payload)?;
                self.status = AppStatus::VideoReady;
                self.result.video = Some(artifact);
                self.write_receipt()?;
                self.result
                    .video
                    .as_ref()
                    .ok_or_else(|| TryOnError::video("video artifact missing").into())
            }
            Err(err) => {
                self.status = AppStatus::ImageReady;
                self.last_error = Some(format!("{err:#}"));
                let mut payload = EventPayload::new();
                payload.insert("provider".to_string(), json!(provider.name()));
                payload.insert("error".to_string(), json!(format!("{err:#}")));
                self.emit("video_failed", payload)?;
                Err(err)
            }
        }
    }

    fn video_input(&self, source: VideoSource) -> Result<PathBuf, TryOnError> {
        if self.status.is_busy() {
            return Err(TryOnError::validation(format!(
                "session is busy ({})",
                self.status.as_str()
            )));
        }
        let Some(composite) = self.result.composite.as_ref() else {
            return Err(TryOnError::validation(
                "generate a lookbook before requesting a video",
            ));
        };
        match source {
            VideoSource::Composite => Ok(composite.path.clone()),
            VideoSource::Pose(index) => self.result.pose_paths.get(index).cloned().ok_or_else(|| {
                TryOnError::validation(format!(
                    "pose index {index} is out of range (expected 0..{})",
                    self.result.pose_paths.len().saturating_sub(1)
                ))
            }),
        }
    }

    /// Clear inputs and results. Files already written stay on disk.
    pub fn reset(&mut self) -> Result<()> {
        self.person = None;
        self.garments = Garments::default();
        self.result = GenerationResult::default();
        self.status = AppStatus::Idle;
        self.provider_name = None;
        self.warnings.clear();
        self.last_error = None;
        self.emit("session_reset", EventPayload::new())?;
        Ok(())
    }

    pub fn receipt(&self) -> LookbookReceipt {
        let provider = self
            .provider_name
            .as_deref()
            .and_then(|name| self.providers.get(name));
        LookbookReceipt {
            session_id: self.session_id.clone(),
            provider: provider
                .map(|provider| provider.name().to_string())
                .unwrap_or_default(),
            model: provider.and_then(|provider| provider.model().map(str::to_string)),
            person: self
                .person
                .as_ref()
                .map(|person| person.display_handle().to_string())
                .unwrap_or_default(),
            garments: self
                .garments
                .present()
                .map(|(slot, payload)| {
                    (slot.as_str().to_string(), payload.display_handle().to_string())
                })
                .collect(),
            poses: POSES
                .iter()
                .zip(self.result.image_urls.iter())
                .map(|(pose, image)| PoseRecord {
                    index: pose.index,
                    label: pose.label.to_string(),
                    image_ref: image.to_string(),
                    path: self.result.pose_paths.get(pose.index).cloned(),
                })
                .collect(),
            composite: self.result.composite.clone(),
            video: self.result.video.clone(),
            warnings: self.warnings.clone(),
        }
    }

    fn write_receipt(&self) -> Result<PathBuf> {
        let path = self.run_dir.join(RECEIPT_FILE);
        let metadata = map_object(json!({
            "status": self.status.as_str(),
            "schedule": self.schedule.as_str(),
        }));
        let payload = build_receipt(&self.receipt(), &path, &metadata);
        write_receipt(&path, &payload)?;
        Ok(path)
    }

    fn emit(&mut self, event_type: &str, payload: Map<String, Value>) -> Result<()> {
        if !self.started {
            self.started = true;
            self.events.emit("session_started", EventPayload::new())?;
        }
        self.events.emit(event_type, payload)?;
        Ok(())
    }
}

fn event_failure(event_type: &str, err: &anyhow::Error) -> String {
    format!("event log write failed for {event_type}: {err:#}")
}

/// Mirrors pose progress into the event log. Write failures are kept for
/// the session's warnings instead of aborting the batch.
struct EventObserver<'a> {
    events: &'a EventWriter,
    provider: &'a str,
    failures: Mutex<Vec<String>>,
}

impl<'a> EventObserver<'a> {
    fn new(events: &'a EventWriter, provider: &'a str) -> Self {
        Self {
            events,
            provider,
            failures: Mutex::new(Vec::new()),
        }
    }

    fn take_failures(&self) -> Vec<String> {
        self.failures
            .lock()
            .map(|mut failures| std::mem::take(&mut *failures))
            .unwrap_or_default()
    }

    fn emit(&self, event_type: &str, pose: &PoseSpec, extra: Option<(&str, Value)>) {
        let mut payload = EventPayload::new();
        payload.insert("provider".to_string(), json!(self.provider));
        payload.insert("pose_index".to_string(), json!(pose.index));
        payload.insert("pose".to_string(), json!(pose.label));
        if let Some((key, value)) = extra {
            payload.insert(key.to_string(), value);
        }
        if let Err(err) = self.events.emit(event_type, payload) {
            if let Ok(mut failures) = self.failures.lock() {
                failures.push(event_failure(event_type, &err));
            }
        }
    }
}

impl PoseObserver for EventObserver<'_> {
    fn pose_started(&self, pose: &PoseSpec) {
        self.emit("pose_started", pose, None);
    }

    fn pose_completed(&self, pose: &PoseSpec, image: &ImageRef) {
        self.emit("pose_completed", pose, Some(("image", json!(image.to_string()))));
    }
}
