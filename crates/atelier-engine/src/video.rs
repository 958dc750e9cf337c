use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::CredentialKind;
use atelier_contracts::media::ImagePayload;
use atelier_contracts::status::VideoArtifact;
use atelier_contracts::TryOnError;
use sha2::{Digest, Sha256};

/// Longest uninterrupted sleep inside the poll loop.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Handle to a submitted render job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// The job finished. `handle` is where the media can be fetched from.
    Done { handle: Option<String> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoBytes {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// An asynchronous image-to-video backend.
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;

    fn credential(&self) -> Option<CredentialKind> {
        None
    }

    fn submit(&self, image: &ImagePayload) -> Result<VideoJob>;
    fn poll(&self, job: &VideoJob) -> Result<JobStatus>;
    fn download(&self, handle: &str) -> Result<VideoBytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoState {
    Submitted,
    Polling,
    Done,
    Fetching,
    Ready,
    Failed,
}

impl VideoState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Done => "done",
            Self::Fetching => "fetching",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Whether `self` may directly follow `previous` (`None` = start).
    pub fn can_follow(self, previous: Option<VideoState>) -> bool {
        use VideoState::*;
        match (previous, self) {
            (None, Submitted) => true,
            (Some(Submitted), Polling) => true,
            (Some(Polling), Polling | Done) => true,
            (Some(Done), Fetching) => true,
            (Some(Fetching), Ready) => true,
            (Some(Ready | Failed), _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }
}

/// Bounds for the status loop. Unbounded by default, like the hosted
/// job itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_duration: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_duration: None,
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A fetched render plus the states it went through.
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub video: VideoBytes,
    pub handle: String,
    pub trail: Vec<VideoState>,
    pub polls: u32,
}

impl VideoOutcome {
    pub fn write_to(&self, path: &Path) -> Result<VideoArtifact> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.video.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(VideoArtifact {
            path: path.to_path_buf(),
            mime_type: self.video.mime_type.clone(),
            bytes: self.video.bytes.len() as u64,
        })
    }
}

pub struct VideoOrchestrator {
    policy: PollPolicy,
    cancel: CancelToken,
}

struct Trail<'o> {
    states: Vec<VideoState>,
    observer: &'o mut dyn FnMut(VideoState, u32),
}

impl Trail<'_> {
    fn push(&mut self, state: VideoState, polls: u32) -> Result<()> {
        if !state.can_follow(self.states.last().copied()) {
            bail!(
                "illegal video state transition {:?} -> {}",
                self.states.last().map(|state| state.as_str()),
                state.as_str()
            );
        }
        self.states.push(state);
        (self.observer)(state, polls);
        Ok(())
    }

    fn fail(&mut self, polls: u32, err: anyhow::Error) -> anyhow::Error {
        if self.states.last() != Some(&VideoState::Failed) {
            self.states.push(VideoState::Failed);
            (self.observer)(VideoState::Failed, polls);
        }
        err
    }
}

impl VideoOrchestrator {
    pub fn new(policy: PollPolicy, cancel: CancelToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn run(&self, provider: &dyn VideoProvider, image: &ImagePayload) -> Result<VideoOutcome> {
        self.run_with_observer(provider, image, &mut |_: VideoState, _: u32| {})
    }

    /// Like [`run`](Self::run), reporting every state change with the number
    /// of status polls made so far.
    pub fn run_with_observer(
        &self,
        provider: &dyn VideoProvider,
        image: &ImagePayload,
        observer: &mut dyn FnMut(VideoState, u32),
    ) -> Result<VideoOutcome> {
        let mut trail = Trail {
            states: Vec::new(),
            observer,
        };
        let mut polls = 0u32;
        match self.drive(provider, image, &mut trail, &mut polls) {
            Ok((video, handle)) => Ok(VideoOutcome {
                video,
                handle,
                trail: trail.states,
                polls,
            }),
            Err(err) => Err(trail.fail(polls, err)),
        }
    }

    fn drive(
        &self,
        provider: &dyn VideoProvider,
        image: &ImagePayload,
        trail: &mut Trail<'_>,
        polls: &mut u32,
    ) -> Result<(VideoBytes, String)> {
        self.check_cancelled()?;
        let started = Instant::now();
        let job = provider.submit(image)?;
        trail.push(VideoState::Submitted, 0)?;
        trail.push(VideoState::Polling, 0)?;

        let handle = loop {
            self.wait_interval(started, *polls)?;
            *polls += 1;
            match provider.poll(&job)? {
                JobStatus::Pending => trail.push(VideoState::Polling, *polls)?,
                JobStatus::Done { handle } => {
                    trail.push(VideoState::Done, *polls)?;
                    break handle;
                }
                JobStatus::Failed(message) => {
                    return Err(TryOnError::video(message).into());
                }
            }
        };

        let Some(handle) = handle.map(|value| value.trim().to_string()).filter(|v| !v.is_empty())
        else {
            return Err(TryOnError::video("Video generation failed or returned no URI.").into());
        };
        trail.push(VideoState::Fetching, *polls)?;
        self.check_cancelled()?;
        let video = provider.download(&handle)?;
        if video.bytes.is_empty() {
            return Err(TryOnError::video("downloaded video is empty").into());
        }
        trail.push(VideoState::Ready, *polls)?;
        Ok((video, handle))
    }

    /// Sleep one interval in short slices, honouring cancellation and the
    /// policy's bounds.
    fn wait_interval(&self, started: Instant, polls_so_far: u32) -> Result<()> {
        if let Some(max_attempts) = self.policy.max_attempts {
            if polls_so_far >= max_attempts {
                return Err(TryOnError::Timeout {
                    waited: started.elapsed(),
                }
                .into());
            }
        }
        let wake_at = started.elapsed() + self.policy.interval;
        if let Some(max_duration) = self.policy.max_duration {
            if wake_at > max_duration {
                return Err(TryOnError::Timeout {
                    waited: started.elapsed(),
                }
                .into());
            }
        }
        loop {
            self.check_cancelled()?;
            let elapsed = started.elapsed();
            if elapsed >= wake_at {
                return Ok(());
            }
            thread::sleep((wake_at - elapsed).min(SLEEP_SLICE));
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TryOnError::Cancelled.into());
        }
        Ok(())
    }
}

/// Offline video backend: finishes after a fixed number of polls and
/// returns a tiny MP4 header.
#[derive(Debug, Default)]
pub struct DryrunVideoProvider {
    pending_polls: u32,
    polls: AtomicU32,
}

impl DryrunVideoProvider {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            polls: AtomicU32::new(0),
        }
    }
}

impl VideoProvider for DryrunVideoProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn submit(&self, image: &ImagePayload) -> Result<VideoJob> {
        let digest = Sha256::digest(image.bytes());
        self.polls.store(0, Ordering::SeqCst);
        Ok(VideoJob {
            id: format!("dryrun-{}", hex::encode(&digest[..6])),
        })
    }

    fn poll(&self, job: &VideoJob) -> Result<JobStatus> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if seen <= self.pending_polls {
            return Ok(JobStatus::Pending);
        }
        Ok(JobStatus::Done {
            handle: Some(format!("dryrun://{}", job.id)),
        })
    }

    fn download(&self, handle: &str) -> Result<VideoBytes> {
        if !handle.starts_with("dryrun://") {
            bail!("dryrun cannot fetch {handle}");
        }
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypmp42");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"mp42isom");
        Ok(VideoBytes {
            bytes,
            mime_type: "video/mp4".to_string(),
        })
    }
}
