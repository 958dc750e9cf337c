pub mod compositor;
pub mod config;
pub mod ingest;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod video;

pub use compositor::{Composite, Compositor, GridLayout};
pub use config::EngineConfig;
pub use ingest::Ingestor;
pub use orchestrator::{generate_poses, NoopObserver, PoseObserver, Schedule};
pub use providers::{default_registry, DryrunProvider, ProviderRegistry, TryOnProvider};
pub use session::{Session, VideoSource};
pub use video::{
    CancelToken, DryrunVideoProvider, PollPolicy, VideoOrchestrator, VideoOutcome, VideoProvider,
    VideoState,
};
