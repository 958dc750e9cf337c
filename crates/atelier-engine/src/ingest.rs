use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::media::{ImagePayload, ImageRef, ImageRefKind};
use reqwest::blocking::Client as HttpClient;

use crate::providers::truncate_text;

/// Turns user-supplied images into [`ImagePayload`]s.
///
/// Sources may be a local path, an `http(s)` URL, or a `data:` URL. The MIME
/// type comes from the bytes when they are a recognised image, then from the
/// declared type, then from the file extension.
pub struct Ingestor {
    http: HttpClient,
    timeout: Duration,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestor {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn load(&self, source: &str) -> Result<ImagePayload> {
        let source = source.trim();
        if source.is_empty() {
            bail!("image source is empty");
        }
        match ImageRef::new(source).kind() {
            ImageRefKind::DataUrl => from_data_url(source),
            ImageRefKind::Remote => self.from_url(source),
            ImageRefKind::File => from_path(Path::new(source)),
        }
    }

    pub fn from_url(&self, url: &str) -> Result<ImagePayload> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("failed to fetch image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!("image fetch failed ({code}): {}", truncate_text(&body, 256));
        }
        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading image bytes ({url})"))?
            .to_vec();
        from_bytes(bytes, declared.as_deref(), url)
    }
}

pub fn from_path(path: &Path) -> Result<ImagePayload> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    from_bytes(bytes, mime_for_path(path), &path.to_string_lossy())
}

pub fn from_data_url(raw: &str) -> Result<ImagePayload> {
    let (mime_type, bytes) = ImageRef::new(raw).decode_data_url()?;
    from_bytes(bytes, Some(&mime_type), "inline")
}

/// Wrap raw bytes. Fails on empty input or bytes with no image type at all.
pub fn from_bytes(
    bytes: Vec<u8>,
    declared_mime: Option<&str>,
    display_handle: &str,
) -> Result<ImagePayload> {
    if bytes.is_empty() {
        bail!("image {display_handle} is empty");
    }
    let declared = declared_mime
        .map(str::trim)
        .filter(|value| value.starts_with("image/"));
    let Some(mime_type) = sniff_mime(&bytes).or(declared) else {
        bail!("{display_handle} is not a recognised image");
    };
    Ok(ImagePayload::new(bytes, mime_type, display_handle))
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        video if video.starts_with("video/") => "mp4",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::{extension_for_mime, from_bytes, from_path, Ingestor};

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[test]
    fn file_with_wrong_extension_is_sniffed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("person.jpg");
        std::fs::write(&path, png_bytes()?)?;
        let payload = from_path(&path)?;
        assert_eq!(payload.mime_type(), "image/png");
        assert!(payload.display_handle().ends_with("person.jpg"));
        Ok(())
    }

    #[test]
    fn data_url_round_trips_through_loader() -> anyhow::Result<()> {
        let bytes = png_bytes()?;
        let source = atelier_contracts::media::ImageRef::data_url("image/png", &bytes);
        let payload = Ingestor::new().load(source.as_str())?;
        assert_eq!(payload.bytes(), bytes.as_slice());
        assert_eq!(payload.display_handle(), "inline");
        Ok(())
    }

    #[test]
    fn rejects_empty_and_non_image_bytes() {
        assert!(from_bytes(Vec::new(), Some("image/png"), "x").is_err());
        assert!(from_bytes(b"hello".to_vec(), Some("text/plain"), "notes.txt").is_err());
        assert!(Ingestor::new().load("   ").is_err());
    }

    #[test]
    fn declared_type_used_when_bytes_are_opaque() -> anyhow::Result<()> {
        let payload = from_bytes(vec![0, 1, 2, 3], Some("image/heic"), "photo.heic")?;
        assert_eq!(payload.mime_type(), "image/heic");
        Ok(())
    }

    #[test]
    fn extensions_follow_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("Video/WebM"), "webm");
        assert_eq!(extension_for_mime("video/x-unknown"), "mp4");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
