use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::media::ImageRef;
use crate::outfit::POSE_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Idle,
    GeneratingImage,
    ImageReady,
    GeneratingVideo,
    VideoReady,
    Error,
}

impl AppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GeneratingImage => "generating_image",
            Self::ImageReady => "image_ready",
            Self::GeneratingVideo => "generating_video",
            Self::VideoReady => "video_ready",
            Self::Error => "error",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::GeneratingImage | Self::GeneratingVideo)
    }
}

/// Lookbook grid written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeArtifact {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub mime_type: String,
    pub bytes: u64,
}

/// Outputs of one generation cycle.
///
/// Starts empty, gains one pose reference per completed pose, and is replaced
/// wholesale on reset. `composite` is only ever set once all four poses exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub image_urls: Vec<ImageRef>,
    /// Saved copies of `image_urls`, same order.
    #[serde(default)]
    pub pose_paths: Vec<PathBuf>,
    pub composite: Option<CompositeArtifact>,
    pub video: Option<VideoArtifact>,
}

impl GenerationResult {
    pub fn is_complete(&self) -> bool {
        self.image_urls.len() == POSE_COUNT
    }

    pub fn has_image(&self) -> bool {
        self.composite.is_some()
    }
}
