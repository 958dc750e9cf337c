use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use super::store::read_json_object;
use super::{normalize_key, CredentialKind, CredentialStore};
use crate::error::TryOnError;

/// One place an API key may come from. A source that has nothing for `kind`
/// answers `None`; it never fails.
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;
    fn lookup(&self, kind: CredentialKind) -> Option<String>;
}

/// Keys handed in for this process only (CLI flags).
#[derive(Debug, Clone, Default)]
pub struct OverrideSource {
    values: HashMap<CredentialKind, String>,
}

impl OverrideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CredentialKind, value: Option<String>) -> Self {
        if let Some(value) = value.as_deref().and_then(normalize_key) {
            self.values.insert(kind, value);
        }
        self
    }
}

impl CredentialSource for OverrideSource {
    fn name(&self) -> &str {
        "override"
    }

    fn lookup(&self, kind: CredentialKind) -> Option<String> {
        self.values.get(&kind).cloned()
    }
}

impl CredentialSource for CredentialStore {
    fn name(&self) -> &str {
        "store"
    }

    fn lookup(&self, kind: CredentialKind) -> Option<String> {
        self.get(kind)
    }
}

/// Deployment-time `config.json` with `gemini_api_key` / `wavespeed_api_key`.
/// A missing or unreadable file simply has no keys.
#[derive(Debug, Clone)]
pub struct ConfigFileSource {
    path: PathBuf,
}

impl ConfigFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for ConfigFileSource {
    fn name(&self) -> &str {
        "config"
    }

    fn lookup(&self, kind: CredentialKind) -> Option<String> {
        read_json_object(&self.path)?
            .get(kind.storage_key())
            .and_then(Value::as_str)
            .and_then(normalize_key)
    }
}

/// Process environment, or a fixed table of variables.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSource {
    fixed: Option<HashMap<String, String>>,
}

impl EnvironmentSource {
    pub fn process() -> Self {
        Self { fixed: None }
    }

    pub fn fixed<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fixed: Some(
                vars.into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        match &self.fixed {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }
}

impl CredentialSource for EnvironmentSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn lookup(&self, kind: CredentialKind) -> Option<String> {
        kind.env_keys()
            .iter()
            .find_map(|key| self.var(key).as_deref().and_then(normalize_key))
    }
}

/// Ordered list of sources queried in priority order; first hit wins.
#[derive(Default)]
pub struct CredentialChain {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard order: override, persisted store, `config.json`,
    /// environment.
    pub fn standard(
        overrides: OverrideSource,
        store: CredentialStore,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self::new()
            .push(overrides)
            .push(store)
            .push(ConfigFileSource::new(config_path))
            .push(EnvironmentSource::process())
    }

    pub fn push<S: CredentialSource + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    /// The key and the name of the source that supplied it.
    pub fn resolve_with_source(&self, kind: CredentialKind) -> Option<(String, String)> {
        self.sources.iter().find_map(|source| {
            source
                .lookup(kind)
                .map(|value| (value, source.name().to_string()))
        })
    }

    pub fn resolve(&self, kind: CredentialKind) -> Option<String> {
        self.resolve_with_source(kind).map(|(value, _)| value)
    }

    pub fn has(&self, kind: CredentialKind) -> bool {
        self.resolve(kind).is_some()
    }

    /// Like [`resolve`](Self::resolve) but turns absence into
    /// [`TryOnError::MissingCredential`].
    pub fn require(&self, kind: CredentialKind) -> Result<String, TryOnError> {
        self.resolve(kind)
            .ok_or(TryOnError::MissingCredential { provider: kind })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigFileSource, CredentialChain, CredentialSource, EnvironmentSource, OverrideSource,
    };
    use crate::credentials::{CredentialKind, CredentialStore};
    use crate::error::TryOnError;

    #[test]
    fn first_source_with_a_value_wins() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("credentials.json"));
        store.set(CredentialKind::Gemini, "from-store")?;

        let chain = CredentialChain::new()
            .push(OverrideSource::new().with(CredentialKind::Gemini, Some("from-flag".into())))
            .push(store)
            .push(EnvironmentSource::fixed([("GEMINI_API_KEY", "from-env")]));
        assert_eq!(
            chain.resolve_with_source(CredentialKind::Gemini),
            Some(("from-flag".to_string(), "override".to_string()))
        );
        Ok(())
    }

    #[test]
    fn falls_through_to_later_sources() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config_path = temp.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{ "gemini_api_key": "", "wavespeed_api_key": " ws-config " }"#,
        )?;

        let chain = CredentialChain::new()
            .push(OverrideSource::new())
            .push(CredentialStore::new(temp.path().join("credentials.json")))
            .push(ConfigFileSource::new(&config_path))
            .push(EnvironmentSource::fixed([("API_KEY", "legacy-env")]));

        assert_eq!(
            chain.resolve_with_source(CredentialKind::Wavespeed),
            Some(("ws-config".to_string(), "config".to_string()))
        );
        assert_eq!(
            chain.resolve_with_source(CredentialKind::Gemini),
            Some(("legacy-env".to_string(), "environment".to_string()))
        );
        Ok(())
    }

    #[test]
    fn environment_prefers_specific_variable() {
        let env = EnvironmentSource::fixed([
            ("API_KEY", "generic"),
            ("GEMINI_API_KEY", "specific"),
            ("WAVESPEED_API_KEY", "  "),
        ]);
        assert_eq!(
            env.lookup(CredentialKind::Gemini).as_deref(),
            Some("specific")
        );
        assert_eq!(env.lookup(CredentialKind::Wavespeed), None);
    }

    #[test]
    fn unreadable_config_is_not_found() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config_path = temp.path().join("config.json");
        std::fs::write(&config_path, "not json")?;
        let source = ConfigFileSource::new(&config_path);
        assert_eq!(source.lookup(CredentialKind::Gemini), None);
        assert_eq!(
            ConfigFileSource::new(temp.path().join("missing.json")).lookup(CredentialKind::Gemini),
            None
        );
        Ok(())
    }

    #[test]
    fn require_reports_missing_credential() {
        let chain = CredentialChain::new().push(EnvironmentSource::fixed(Vec::<(String, String)>::new()));
        assert!(!chain.has(CredentialKind::Wavespeed));
        match chain.require(CredentialKind::Wavespeed) {
            Err(TryOnError::MissingCredential { provider }) => {
                assert_eq!(provider, CredentialKind::Wavespeed)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn standard_chain_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let chain = CredentialChain::standard(
            OverrideSource::new(),
            CredentialStore::new(temp.path().join("credentials.json")),
            temp.path().join("config.json"),
        );
        assert_eq!(
            chain.source_names(),
            vec!["override", "store", "config", "environment"]
        );
        Ok(())
    }
}
