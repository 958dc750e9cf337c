use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::CredentialKind;
use atelier_contracts::media::{ImagePayload, ImageRef};
use atelier_contracts::outfit::GenerationRequest;
use atelier_contracts::TryOnError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    download_bytes, error_chain_text, response_json_or_error, ImageBytes, TryOnProvider,
};
use crate::config::EngineConfig;
use crate::prompt::build_for_request;
use crate::video::{JobStatus, VideoBytes, VideoJob, VideoProvider};

const RUNWAY_PROMPT: &str = "Cinematic fashion runway shot. The person is posing confidently and looking at the camera. Slight slow motion, high fashion lighting, 4k quality, photorealistic.";

/// Gemini image model via `generateContent`; the image comes back inline.
pub struct GeminiProvider {
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: &EngineConfig, api_key: Option<String>) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            model: config.gemini_image_model.clone(),
            api_key,
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.api_base, model_path(&self.model))
    }

    fn build_payload(request: &GenerationRequest<'_>) -> Value {
        let plan = build_for_request(request);
        let mut parts: Vec<Value> = plan
            .attachments
            .iter()
            .map(|attachment| inline_part(attachment.payload))
            .collect();
        parts.push(json!({ "text": plan.instruction }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }

    fn call(&self, api_key: &str, request: &GenerationRequest<'_>) -> Result<ImageRef> {
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&Self::build_payload(request))
            .send()
            .with_context(|| format!("Gemini request failed ({})", self.model))?;
        let payload = response_json_or_error("Gemini", response)?;
        let Some(item) = extract_first_image(&payload)? else {
            bail!("No image generated by the model.");
        };
        let mime_type = item.mime_type.unwrap_or_else(|| "image/png".to_string());
        Ok(ImageRef::data_url(&mime_type, &item.bytes))
    }
}

impl TryOnProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn credential(&self) -> Option<CredentialKind> {
        Some(CredentialKind::Gemini)
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<ImageRef> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(TryOnError::MissingCredential {
                provider: CredentialKind::Gemini,
            }
            .into());
        };
        self.call(api_key, request)
            .map_err(|err| TryOnError::provider("gemini", error_chain_text(&err, 1024)).into())
    }
}

/// Veo image-to-video through `predictLongRunning` and operation polling.
pub struct VeoProvider {
    api_base: String,
    model: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl VeoProvider {
    pub fn new(config: &EngineConfig, api_key: Option<String>) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            model: config.veo_model.clone(),
            api_key,
            http: HttpClient::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            TryOnError::MissingCredential {
                provider: CredentialKind::Gemini,
            }
            .into()
        })
    }

    fn submit_payload(image: &ImagePayload) -> Value {
        json!({
            "instances": [{
                "prompt": RUNWAY_PROMPT,
                "image": {
                    "bytesBase64Encoded": image.base64(),
                    "mimeType": image.mime_type(),
                },
            }],
            "parameters": {
                "aspectRatio": "9:16",
                "resolution": "720p",
                "sampleCount": 1,
            },
        })
    }
}

impl VideoProvider for VeoProvider {
    fn name(&self) -> &str {
        "veo"
    }

    fn credential(&self) -> Option<CredentialKind> {
        Some(CredentialKind::Gemini)
    }

    fn submit(&self, image: &ImagePayload) -> Result<VideoJob> {
        let api_key = self.api_key()?;
        let endpoint = format!(
            "{}/{}:predictLongRunning",
            self.api_base,
            model_path(&self.model)
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&Self::submit_payload(image))
            .send()
            .with_context(|| format!("Veo submit failed ({})", self.model))?;
        let payload = response_json_or_error("Veo", response)?;
        let Some(name) = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
        else {
            bail!("Veo submit returned no operation name");
        };
        Ok(VideoJob {
            id: name.to_string(),
        })
    }

    fn poll(&self, job: &VideoJob) -> Result<JobStatus> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/{}", self.api_base, job.id.trim_start_matches('/'));
        let response = self
            .http
            .get(&endpoint)
            .query(&[("key", api_key)])
            .send()
            .with_context(|| format!("Veo poll request failed ({})", job.id))?;
        let payload = response_json_or_error("Veo poll", response)?;
        Ok(operation_status(&payload))
    }

    fn download(&self, handle: &str) -> Result<VideoBytes> {
        let api_key = self.api_key()?;
        let ImageBytes { bytes, mime_type } =
            download_bytes(&self.http, "Veo", handle, &[("key", api_key)])?;
        Ok(VideoBytes {
            bytes,
            mime_type: mime_type
                .filter(|value| value.starts_with("video/"))
                .unwrap_or_else(|| "video/mp4".to_string()),
        })
    }
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    }
}

fn inline_part(payload: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": payload.mime_type(),
            "data": payload.base64(),
        }
    })
}

fn extract_first_image(payload: &Value) -> Result<Option<ImageBytes>> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Some(ImageBytes { bytes, mime_type }));
        }
    }
    Ok(None)
}

/// Map a long-running operation document onto a job status.
fn operation_status(payload: &Value) -> JobStatus {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return JobStatus::Failed(message);
    }
    if !payload.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return JobStatus::Pending;
    }
    let response = payload.get("response");
    let handle = response
        .and_then(|value| value.get("generateVideoResponse"))
        .and_then(|value| value.get("generatedSamples"))
        .or_else(|| response.and_then(|value| value.get("generatedVideos")))
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("video"))
        .and_then(|video| video.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string);
    JobStatus::Done { handle }
}

#[cfg(test)]
mod tests {
    use atelier_contracts::credentials::CredentialKind;
    use atelier_contracts::media::ImagePayload;
    use atelier_contracts::outfit::{GarmentSlot, Garments, GenerationRequest, POSES};
    use atelier_contracts::TryOnError;
    use serde_json::json;

    use super::{
        extract_first_image, model_path, operation_status, GeminiProvider, VeoProvider,
    };
    use crate::config::EngineConfig;
    use crate::providers::TryOnProvider;
    use crate::video::{JobStatus, VideoProvider};

    #[test]
    fn payload_places_images_before_instruction() {
        let person = ImagePayload::new(vec![1], "image/jpeg", "person");
        let mut garments = Garments::default();
        garments.set(
            GarmentSlot::Bottom,
            Some(ImagePayload::new(vec![2], "image/png", "jeans")),
        );
        let request = GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[0],
        };
        let payload = GeminiProvider::build_payload(&request);
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["inlineData"]["data"], json!("Ag=="));
        assert!(parts[2]["text"]
            .as_str()
            .unwrap_or_default()
            .contains("BOTTOM GARMENT"));
    }

    #[test]
    fn extracts_inline_image_or_none() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                ]}
            }]
        });
        let item = extract_first_image(&payload)?.map(|item| item.bytes);
        assert_eq!(item, Some(vec![1, 2, 3]));
        assert!(extract_first_image(&json!({"candidates": []}))?.is_none());
        Ok(())
    }

    #[test]
    fn operation_documents_map_to_status() {
        assert_eq!(
            operation_status(&json!({"name": "operations/1"})),
            JobStatus::Pending
        );
        assert_eq!(
            operation_status(&json!({
                "done": true,
                "response": {"generateVideoResponse": {"generatedSamples": [
                    {"video": {"uri": "https://media/v.mp4?alt=media"}}
                ]}}
            })),
            JobStatus::Done {
                handle: Some("https://media/v.mp4?alt=media".to_string())
            }
        );
        assert_eq!(
            operation_status(&json!({"done": true, "response": {}})),
            JobStatus::Done { handle: None }
        );
        assert_eq!(
            operation_status(&json!({"done": true, "error": {"message": "blocked"}})),
            JobStatus::Failed("blocked".to_string())
        );
    }

    #[test]
    fn missing_key_is_reported_before_any_request() {
        let config = EngineConfig::default().with_state_dir("/nonexistent");
        let person = ImagePayload::new(vec![1], "image/png", "person");
        let garments = Garments::default();
        let request = GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[0],
        };
        let err = GeminiProvider::new(&config, None)
            .generate(&request)
            .unwrap_err();
        assert_eq!(
            TryOnError::missing_credential(&err),
            Some(CredentialKind::Gemini)
        );

        let err = VeoProvider::new(&config, None).submit(&person).unwrap_err();
        assert_eq!(
            TryOnError::missing_credential(&err),
            Some(CredentialKind::Gemini)
        );
    }

    #[test]
    fn model_paths_are_prefixed_once() {
        assert_eq!(model_path("veo-3.1"), "models/veo-3.1");
        assert_eq!(model_path("models/veo-3.1"), "models/veo-3.1");
    }
}
