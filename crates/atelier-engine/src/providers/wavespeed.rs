use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::CredentialKind;
use atelier_contracts::media::ImageRef;
use atelier_contracts::outfit::GenerationRequest;
use atelier_contracts::TryOnError;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{error_chain_text, response_json_or_error, TryOnProvider};
use crate::config::EngineConfig;
use crate::prompt::build_for_request;

/// The two Wavespeed-hosted edit models. Both use the Wavespeed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavespeedModel {
    SeeDream,
    Flux,
}

impl WavespeedModel {
    pub fn provider_name(self) -> &'static str {
        match self {
            Self::SeeDream => "seedream",
            Self::Flux => "flux",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::SeeDream => "SeeDream",
            Self::Flux => "Flux",
        }
    }
}

/// Async prediction API: submit, then poll the result URL until the
/// prediction completes.
pub struct WavespeedProvider {
    kind: WavespeedModel,
    api_base: String,
    model: String,
    api_key: Option<String>,
    poll_interval: Duration,
    poll_timeout: Duration,
    http: HttpClient,
}

impl WavespeedProvider {
    pub fn new(config: &EngineConfig, kind: WavespeedModel, api_key: Option<String>) -> Self {
        let model = match kind {
            WavespeedModel::SeeDream => config.seedream_model.clone(),
            WavespeedModel::Flux => config.flux_model.clone(),
        };
        Self {
            kind,
            api_base: config.wavespeed_api_base.clone(),
            model,
            api_key,
            poll_interval: config.wavespeed_poll_interval,
            poll_timeout: config.wavespeed_poll_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.api_base, self.model.trim().trim_matches('/'))
    }

    fn build_payload(&self, request: &GenerationRequest<'_>) -> Value {
        let plan = build_for_request(request);
        let images: Vec<Value> = plan
            .attachments
            .iter()
            .map(|attachment| Value::String(attachment.payload.to_data_url()))
            .collect();
        let mut payload = json!({
            "prompt": plan.instruction,
            "images": images,
            "enable_sync_mode": false,
            "enable_base64_output": false,
        });
        if self.kind == WavespeedModel::SeeDream {
            payload["size"] = json!("2048*2048");
        }
        payload
    }

    fn call(&self, api_key: &str, request: &GenerationRequest<'_>) -> Result<ImageRef> {
        let label = self.kind.label();
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_payload(request))
            .send()
            .with_context(|| format!("{label} request failed ({})", self.model))?;
        let payload = response_json_or_error(label, response)?;
        let data = payload.get("data").unwrap_or(&payload);
        if let Some(url) = first_output(data) {
            return Ok(ImageRef::new(url));
        }
        let poll_url = data
            .get("urls")
            .and_then(|urls| urls.get("get"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                data.get("id")
                    .and_then(Value::as_str)
                    .map(|id| format!("{}/predictions/{id}/result", self.api_base))
            });
        let Some(poll_url) = poll_url else {
            bail!("{label} response had neither outputs nor a prediction id");
        };
        let result = self.poll_prediction(&poll_url, api_key)?;
        match first_output(&result) {
            Some(url) => Ok(ImageRef::new(url)),
            None => bail!("No image generated by the model."),
        }
    }

    fn poll_prediction(&self, poll_url: &str, api_key: &str) -> Result<Value> {
        let label = self.kind.label();
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(api_key)
                .send()
                .with_context(|| format!("{label} poll request failed ({poll_url})"))?;
            let payload = response_json_or_error(label, response)?;
            let data = payload.get("data").cloned().unwrap_or(payload);
            let status = data
                .get("status")
                .and_then(Value::as_str)
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_default();
            match status.as_str() {
                "completed" | "succeeded" => return Ok(data),
                "failed" | "canceled" | "cancelled" => {
                    let message = data
                        .get("error")
                        .and_then(Value::as_str)
                        .filter(|value| !value.trim().is_empty())
                        .unwrap_or("prediction failed");
                    bail!("{label} prediction failed: {message}");
                }
                _ => {}
            }
            if started.elapsed() >= self.poll_timeout {
                bail!(
                    "{label} polling timed out after {:.1}s",
                    self.poll_timeout.as_secs_f64()
                );
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl TryOnProvider for WavespeedProvider {
    fn name(&self) -> &str {
        self.kind.provider_name()
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn credential(&self) -> Option<CredentialKind> {
        Some(CredentialKind::Wavespeed)
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<ImageRef> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(TryOnError::MissingCredential {
                provider: CredentialKind::Wavespeed,
            }
            .into());
        };
        self.call(api_key, request).map_err(|err| {
            TryOnError::provider(self.kind.provider_name(), error_chain_text(&err, 1024)).into()
        })
    }
}

fn first_output(data: &Value) -> Option<String> {
    data.get("outputs")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use atelier_contracts::credentials::CredentialKind;
    use atelier_contracts::media::ImagePayload;
    use atelier_contracts::outfit::{GarmentSlot, Garments, GenerationRequest, POSES};
    use atelier_contracts::TryOnError;
    use serde_json::json;

    use super::{first_output, WavespeedModel, WavespeedProvider};
    use crate::config::EngineConfig;
    use crate::providers::TryOnProvider;

    #[test]
    fn payload_sends_data_urls_in_attachment_order() {
        let config = EngineConfig::default();
        let provider = WavespeedProvider::new(&config, WavespeedModel::Flux, Some("k".to_string()));
        let person = ImagePayload::new(vec![1], "image/jpeg", "person");
        let mut garments = Garments::default();
        garments.set(
            GarmentSlot::Shoes,
            Some(ImagePayload::new(vec![2], "image/png", "shoes")),
        );
        let request = GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[3],
        };
        let payload = provider.build_payload(&request);
        assert_eq!(
            payload["images"],
            json!(["data:image/jpeg;base64,AQ==", "data:image/png;base64,Ag=="])
        );
        assert!(payload["prompt"]
            .as_str()
            .unwrap_or_default()
            .contains("Pose 4 - Dynamic"));
        assert!(payload.get("size").is_none());
        assert_eq!(
            provider.endpoint(),
            "https://api.wavespeed.ai/api/v3/wavespeed-ai/flux-2-pro/edit"
        );
    }

    #[test]
    fn outputs_are_read_from_prediction_data() {
        assert_eq!(
            first_output(&json!({"outputs": ["https://cdn/x.png"]})),
            Some("https://cdn/x.png".to_string())
        );
        assert_eq!(first_output(&json!({"outputs": []})), None);
        assert_eq!(first_output(&json!({"status": "processing"})), None);
    }

    #[test]
    fn both_models_share_the_wavespeed_key() {
        let config = EngineConfig::default();
        let person = ImagePayload::new(vec![1], "image/png", "person");
        let garments = Garments::default();
        let request = GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[0],
        };
        for kind in [WavespeedModel::SeeDream, WavespeedModel::Flux] {
            let provider = WavespeedProvider::new(&config, kind, None);
            assert_eq!(provider.credential(), Some(CredentialKind::Wavespeed));
            let err = provider.generate(&request).unwrap_err();
            assert_eq!(
                TryOnError::missing_credential(&err),
                Some(CredentialKind::Wavespeed)
            );
        }
    }
}
