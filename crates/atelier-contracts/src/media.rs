use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// An image held in memory, ready to be attached to a provider request.
///
/// Built once per upload or fetch and never mutated afterwards; the base64
/// form is computed at construction so every request reuses the same text.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    base64: String,
    mime_type: String,
    display_handle: String,
}

impl ImagePayload {
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        display_handle: impl Into<String>,
    ) -> Self {
        let base64 = BASE64.encode(&bytes);
        Self {
            bytes,
            base64,
            mime_type: mime_type.into(),
            display_handle: display_handle.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Where the image came from (path, URL, or `inline`), for display only.
    pub fn display_handle(&self) -> &str {
        &self.display_handle
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("display_handle", &self.display_handle)
            .finish()
    }
}

/// Opaque reference to a generated image: a `data:` URL, an `http(s)` URL,
/// or a local file path.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRefKind {
    DataUrl,
    Remote,
    File,
}

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn data_url(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime_type};base64,{}", BASE64.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ImageRefKind {
        let lowered = self.0.trim_start().to_ascii_lowercase();
        if lowered.starts_with("data:") {
            ImageRefKind::DataUrl
        } else if lowered.starts_with("http://") || lowered.starts_with("https://") {
            ImageRefKind::Remote
        } else {
            ImageRefKind::File
        }
    }

    /// Split a base64 `data:` URL into its MIME type and decoded bytes.
    pub fn decode_data_url(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let raw = self.0.trim();
        let Some(rest) = raw.strip_prefix("data:") else {
            anyhow::bail!("not a data URL");
        };
        let Some((header, payload)) = rest.split_once(',') else {
            anyhow::bail!("malformed data URL: missing ',' separator");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            anyhow::bail!("unsupported data URL encoding (expected base64)");
        };
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|err| anyhow::anyhow!("data URL base64 decode failed: {err}"))?;
        let mime_type = if mime_type.is_empty() {
            "application/octet-stream"
        } else {
            mime_type
        };
        Ok((mime_type.to_string(), bytes))
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageRef({})", self)
    }
}

/// Data URLs are shortened so logs and receipts stay readable.
impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind() == ImageRefKind::DataUrl {
            let header = self.0.split(',').next().unwrap_or("data:");
            return write!(f, "{header},<{} chars>", self.0.len());
        }
        f.write_str(&self.0)
    }
}
