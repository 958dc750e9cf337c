use std::thread;

use anyhow::{anyhow, Result};
use atelier_contracts::media::{ImagePayload, ImageRef};
use atelier_contracts::outfit::{Garments, GenerationRequest, PoseSpec, POSES};

use crate::providers::TryOnProvider;

/// How the four pose calls are issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    /// One call at a time; a failure stops the remaining poses.
    #[default]
    Sequential,
    /// All four at once on scoped threads. Results keep pose order and any
    /// failure still fails the batch.
    Parallel,
}

impl Schedule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

/// Per-pose progress callbacks. Called from worker threads under
/// [`Schedule::Parallel`].
pub trait PoseObserver: Sync {
    fn pose_started(&self, _pose: &PoseSpec) {}
    fn pose_completed(&self, _pose: &PoseSpec, _image: &ImageRef) {}
    fn pose_failed(&self, _pose: &PoseSpec, _err: &anyhow::Error) {}
}

pub struct NoopObserver;

impl PoseObserver for NoopObserver {}

/// Render every pose of the lookbook with `provider`.
///
/// Returns exactly four references in pose order, or the first error in pose
/// order with no partial results.
pub fn generate_poses(
    provider: &dyn TryOnProvider,
    person: &ImagePayload,
    garments: &Garments,
    schedule: Schedule,
    observer: &dyn PoseObserver,
) -> Result<Vec<ImageRef>> {
    match schedule {
        Schedule::Sequential => {
            let mut images = Vec::with_capacity(POSES.len());
            for pose in POSES.iter() {
                images.push(render_pose(provider, person, garments, pose, observer)?);
            }
            Ok(images)
        }
        Schedule::Parallel => thread::scope(|scope| {
            let workers: Vec<_> = POSES
                .iter()
                .map(|pose| {
                    scope.spawn(move || render_pose(provider, person, garments, pose, observer))
                })
                .collect();
            let outcomes: Vec<Result<ImageRef>> = workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("pose worker panicked")))
                })
                .collect();
            outcomes.into_iter().collect()
        }),
    }
}

fn render_pose(
    provider: &dyn TryOnProvider,
    person: &ImagePayload,
    garments: &Garments,
    pose: &'static PoseSpec,
    observer: &dyn PoseObserver,
) -> Result<ImageRef> {
    observer.pose_started(pose);
    let request = GenerationRequest {
        person,
        garments,
        pose,
    };
    match provider.generate(&request) {
        Ok(image) => {
            observer.pose_completed(pose, &image);
            Ok(image)
        }
        Err(err) => {
            observer.pose_failed(pose, &err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use atelier_contracts::media::{ImagePayload, ImageRef};
    use atelier_contracts::outfit::{GarmentSlot, Garments, GenerationRequest, PoseSpec};

    use super::{generate_poses, NoopObserver, PoseObserver, Schedule};
    use crate::providers::TryOnProvider;

    /// Records call order; optionally fails one pose.
    struct Recording {
        fail_on: Option<usize>,
        calls: Mutex<Vec<usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl Recording {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                fail_on,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl TryOnProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn generate(&self, request: &GenerationRequest<'_>) -> Result<ImageRef> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(request.pose.index);
            }
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(request.pose.index) {
                bail!("quota exceeded on pose {}", request.pose.index);
            }
            Ok(ImageRef::new(format!("https://cdn/{}.png", request.pose.slug)))
        }
    }

    #[derive(Default)]
    struct Progress {
        events: Mutex<Vec<String>>,
    }

    impl PoseObserver for Progress {
        fn pose_started(&self, pose: &PoseSpec) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("start:{}", pose.index));
            }
        }

        fn pose_completed(&self, pose: &PoseSpec, _image: &ImageRef) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("done:{}", pose.index));
            }
        }
    }

    fn inputs() -> (ImagePayload, Garments) {
        let person = ImagePayload::new(vec![1], "image/png", "person");
        let mut garments = Garments::default();
        garments.set(
            GarmentSlot::Top,
            Some(ImagePayload::new(vec![2], "image/png", "top")),
        );
        (person, garments)
    }

    #[test]
    fn sequential_returns_four_results_in_pose_order() -> anyhow::Result<()> {
        let (person, garments) = inputs();
        let provider = Recording::new(None);
        let progress = Progress::default();
        let images = generate_poses(&provider, &person, &garments, Schedule::Sequential, &progress)?;

        assert_eq!(provider.calls(), vec![0, 1, 2, 3]);
        let urls: Vec<&str> = images.iter().map(ImageRef::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn/frontal.png",
                "https://cdn/three-quarter.png",
                "https://cdn/profile.png",
                "https://cdn/dynamic.png",
            ]
        );
        let events = progress.events.lock().map(|e| e.clone()).unwrap_or_default();
        assert_eq!(events[0], "start:0");
        assert_eq!(events[1], "done:0");
        assert_eq!(events.len(), 8);
        Ok(())
    }

    #[test]
    fn sequential_failure_short_circuits() {
        let (person, garments) = inputs();
        let provider = Recording::new(Some(1));
        let err = generate_poses(&provider, &person, &garments, Schedule::Sequential, &NoopObserver)
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded on pose 1");
        assert_eq!(provider.calls(), vec![0, 1]);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallel_keeps_order_and_overlaps_calls() -> anyhow::Result<()> {
        let (person, garments) = inputs();
        let mut provider = Recording::new(None);
        provider.delay = Duration::from_millis(40);
        let images = generate_poses(&provider, &person, &garments, Schedule::Parallel, &NoopObserver)?;
        assert_eq!(images.len(), 4);
        assert_eq!(images[2].as_str(), "https://cdn/profile.png");
        assert!(provider.max_in_flight.load(Ordering::SeqCst) > 1);
        Ok(())
    }

    #[test]
    fn parallel_failure_fails_the_batch() {
        let (person, garments) = inputs();
        let provider = Recording::new(Some(2));
        let err = generate_poses(&provider, &person, &garments, Schedule::Parallel, &NoopObserver)
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded on pose 2");
        assert_eq!(provider.calls().len(), 4);
    }
}
