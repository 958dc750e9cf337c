mod gemini;
mod wavespeed;

use std::io::Cursor;

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::{CredentialChain, CredentialKind};
use atelier_contracts::media::ImageRef;
use atelier_contracts::outfit::GenerationRequest;
use image::{ImageFormat, Rgb, RgbImage};
use indexmap::IndexMap;
use reqwest::blocking::Response as HttpResponse;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;

pub use gemini::{GeminiProvider, VeoProvider};
pub use wavespeed::{WavespeedModel, WavespeedProvider};

/// One try-on backend: a person, garments and a pose in, one image out.
///
/// Implementations must be shareable across threads so the orchestrator can
/// run poses in parallel.
pub trait TryOnProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model id reported in receipts.
    fn model(&self) -> Option<&str> {
        None
    }

    /// The API key this backend needs, if any. Checked before the first call.
    fn credential(&self) -> Option<CredentialKind> {
        None
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<ImageRef>;
}

/// Backends keyed by name, in registration order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Box<dyn TryOnProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: TryOnProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn TryOnProvider> {
        self.providers
            .get(name.trim().to_ascii_lowercase().as_str())
            .map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Gemini, SeeDream, Flux and dryrun, with keys resolved through `credentials`.
pub fn default_registry(config: &EngineConfig, credentials: &CredentialChain) -> ProviderRegistry {
    let gemini_key = credentials.resolve(CredentialKind::Gemini);
    let wavespeed_key = credentials.resolve(CredentialKind::Wavespeed);

    let mut providers = ProviderRegistry::new();
    providers.register(GeminiProvider::new(config, gemini_key));
    providers.register(WavespeedProvider::new(
        config,
        WavespeedModel::SeeDream,
        wavespeed_key.clone(),
    ));
    providers.register(WavespeedProvider::new(
        config,
        WavespeedModel::Flux,
        wavespeed_key,
    ));
    providers.register(DryrunProvider::default());
    providers
}

/// Offline backend: a solid colour derived from the inputs and the pose.
#[derive(Debug, Clone)]
pub struct DryrunProvider {
    width: u32,
    height: u32,
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new(384, 512)
    }
}

impl DryrunProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl TryOnProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> Option<&str> {
        Some("dryrun-tryon-1")
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<ImageRef> {
        let mut hasher = Sha256::new();
        hasher.update(request.person.bytes());
        for (slot, payload) in request.garments.present() {
            hasher.update(slot.as_str().as_bytes());
            hasher.update(payload.bytes());
        }
        hasher.update(request.pose.slug.as_bytes());
        let digest = hasher.finalize();

        let image = RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([digest[0], digest[1], digest[2]]),
        );
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(ImageRef::data_url("image/png", &out.into_inner()))
    }
}

pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn download_bytes(
    http: &reqwest::blocking::Client,
    provider: &str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<ImageBytes> {
    let response = http
        .get(url)
        .query(query)
        .send()
        .with_context(|| format!("failed downloading {provider} output"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading {provider} output bytes"))?
        .to_vec();
    Ok(ImageBytes { bytes, mime_type })
}

/// Flatten an error chain into one line for provider error messages.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use atelier_contracts::credentials::{CredentialChain, CredentialKind, OverrideSource};
    use atelier_contracts::media::{ImagePayload, ImageRefKind};
    use atelier_contracts::outfit::{GarmentSlot, Garments, GenerationRequest, POSES};

    use super::{default_registry, error_chain_text, truncate_text, DryrunProvider, TryOnProvider};
    use crate::config::EngineConfig;

    #[test]
    fn registry_lists_all_backends() {
        let chain = CredentialChain::new().push(OverrideSource::new());
        let registry = default_registry(&EngineConfig::default(), &chain);
        assert_eq!(registry.names(), vec!["gemini", "seedream", "flux", "dryrun"]);
        assert_eq!(
            registry.get("Flux").and_then(|provider| provider.credential()),
            Some(CredentialKind::Wavespeed)
        );
        assert_eq!(
            registry.get("gemini").and_then(|provider| provider.credential()),
            Some(CredentialKind::Gemini)
        );
        assert!(registry.get("dryrun").and_then(|p| p.credential()).is_none());
        assert!(registry.get("midjourney").is_none());
    }

    #[test]
    fn dryrun_is_deterministic_per_pose() -> anyhow::Result<()> {
        let person = ImagePayload::new(vec![1, 2, 3], "image/png", "person");
        let mut garments = Garments::default();
        garments.set(
            GarmentSlot::Top,
            Some(ImagePayload::new(vec![4], "image/png", "top")),
        );
        let provider = DryrunProvider::new(8, 12);
        let request = |idx: usize| GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[idx],
        };

        let first = provider.generate(&request(0))?;
        let again = provider.generate(&request(0))?;
        let other = provider.generate(&request(1))?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(first.kind(), ImageRefKind::DataUrl);

        let (_, bytes) = first.decode_data_url()?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (8, 12));
        Ok(())
    }

    #[test]
    fn error_text_joins_causes() {
        let err = anyhow::anyhow!("socket closed").context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: socket closed"
        );
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
