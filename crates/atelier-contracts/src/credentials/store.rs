use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use anyhow::{bail, Context};

use super::{normalize_key, CredentialKind};

/// Durable key-value file holding one API key per provider.
///
/// Every read goes back to disk, so two handles on the same file observe each
/// other's writes. Writes merge into the file on disk and keep unrelated keys.
/// A file that does not parse is reported, never overwritten.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, kind: CredentialKind) -> Option<String> {
        read_json_object(&self.path)?
            .get(kind.storage_key())
            .and_then(Value::as_str)
            .and_then(normalize_key)
    }

    pub fn has(&self, kind: CredentialKind) -> bool {
        self.get(kind).is_some()
    }

    /// Store `value` for `kind`, replacing any earlier value. Blank input is
    /// rejected so a stored key is always usable.
    pub fn set(&self, kind: CredentialKind, value: &str) -> anyhow::Result<()> {
        let Some(value) = normalize_key(value) else {
            bail!("refusing to store an empty {} API key", kind.display_name());
        };
        let mut on_disk = load_for_update(&self.path)?.unwrap_or_default();
        on_disk.insert(kind.storage_key().to_string(), Value::String(value));
        write_json_object(&self.path, &on_disk)
    }

    /// Clearing an absent key is a no-op.
    pub fn clear(&self, kind: CredentialKind) -> anyhow::Result<()> {
        let Some(mut on_disk) = load_for_update(&self.path)? else {
            return Ok(());
        };
        if on_disk.remove(kind.storage_key()).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &on_disk)
    }
}

pub(crate) fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

/// Strict read for writers: a missing file is `None`, anything unparseable is
/// an error.
fn load_for_update(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse credentials file {}", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(Some(map)),
        _ => bail!(
            "credentials file {} is not a JSON object",
            path.display()
        ),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
