use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::{CompositeArtifact, VideoArtifact};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// One rendered pose as recorded in the receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub index: usize,
    pub label: String,
    /// Display form of the provider's reference; inline payloads are elided.
    pub image_ref: String,
    pub path: Option<PathBuf>,
}

/// What a lookbook run asked for and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LookbookReceipt {
    pub session_id: String,
    pub provider: String,
    pub model: Option<String>,
    pub person: String,
    /// Slot name to display handle, in slot order.
    #[serde(default)]
    pub garments: Vec<(String, String)>,
    #[serde(default)]
    pub poses: Vec<PoseRecord>,
    pub composite: Option<CompositeArtifact>,
    pub video: Option<VideoArtifact>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

pub fn build_receipt(
    receipt: &LookbookReceipt,
    receipt_path: &Path,
    provider_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "session_id".to_string(),
        Value::String(receipt.session_id.clone()),
    );

    let mut request = Map::new();
    request.insert(
        "provider".to_string(),
        Value::String(receipt.provider.clone()),
    );
    request.insert(
        "model".to_string(),
        receipt
            .model
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    request.insert("person".to_string(), Value::String(receipt.person.clone()));
    let garments = receipt
        .garments
        .iter()
        .map(|(slot, handle)| (slot.clone(), Value::String(handle.clone())))
        .collect::<Map<String, Value>>();
    request.insert("garments".to_string(), Value::Object(garments));
    root.insert("request".to_string(), Value::Object(request));

    root.insert(
        "poses".to_string(),
        sanitize_payload(&serde_json::to_value(&receipt.poses).unwrap_or(Value::Null)),
    );

    let mut artifacts = Map::new();
    if let Some(composite) = &receipt.composite {
        artifacts.insert(
            "composite".to_string(),
            serde_json::to_value(composite).unwrap_or(Value::Null),
        );
    }
    if let Some(video) = &receipt.video {
        artifacts.insert(
            "video".to_string(),
            serde_json::to_value(video).unwrap_or(Value::Null),
        );
    }
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));

    root.insert(
        "warnings".to_string(),
        Value::Array(receipt.warnings.iter().cloned().map(Value::String).collect()),
    );
    root.insert(
        "provider_metadata".to_string(),
        sanitize_payload(&Value::Object(provider_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replace binary-ish fields and inline `data:` URLs with `<omitted>`.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(text) if text.trim_start().starts_with("data:") => {
            Value::String("<omitted>".to_string())
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "bytesbase64encoded"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
