mod sources;
mod store;

use serde::{Deserialize, Serialize};

pub use sources::{
    ConfigFileSource, CredentialChain, CredentialSource, EnvironmentSource, OverrideSource,
};
pub use store::CredentialStore;

/// The two independent API keys the application knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Gemini,
    Wavespeed,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Gemini, CredentialKind::Wavespeed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Wavespeed => "wavespeed",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Wavespeed => "Wavespeed",
        }
    }

    /// Key under which the value is persisted, shared by the credential
    /// store and `config.json`.
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Gemini => "gemini_api_key",
            Self::Wavespeed => "wavespeed_api_key",
        }
    }

    /// Environment variables consulted for this key, most specific first.
    pub fn env_keys(self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"],
            Self::Wavespeed => &["WAVESPEED_API_KEY"],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "wavespeed" | "seedream" | "flux" => Some(Self::Wavespeed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}
