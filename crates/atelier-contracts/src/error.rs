use std::time::Duration;

use crate::credentials::CredentialKind;

/// Failure taxonomy shared by the engine and the CLI.
///
/// Engine code propagates `anyhow::Error`; callers that need to branch on the
/// failure kind recover it with [`TryOnError::find`].
#[derive(thiserror::Error, Debug)]
pub enum TryOnError {
    /// No API key could be resolved for the provider. Raised before any
    /// network call is made.
    #[error("{} API key not found; store one with `atelier keys set {}`", .provider.display_name(), .provider.as_str())]
    MissingCredential { provider: CredentialKind },

    /// Required inputs are missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A generation backend failed. The message is the provider's own.
    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    /// The grid could not be composed. No partial output exists.
    #[error("composite error: {0}")]
    Composite(String),

    /// The video step failed. Earlier image artifacts stay valid.
    #[error("video error: {0}")]
    Video(String),

    /// A bounded poll loop ran out of time or attempts.
    #[error("timed out after {:.1}s waiting for the render job", .waited.as_secs_f64())]
    Timeout { waited: Duration },

    /// The caller abandoned the operation through its cancel token.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TryOnError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn composite(msg: impl Into<String>) -> Self {
        Self::Composite(msg.into())
    }

    pub fn video(msg: impl Into<String>) -> Self {
        Self::Video(msg.into())
    }

    pub fn find(err: &anyhow::Error) -> Option<&TryOnError> {
        err.chain().find_map(|cause| cause.downcast_ref::<TryOnError>())
    }

    /// The credential the user has to supply, when that is why `err` failed.
    pub fn missing_credential(err: &anyhow::Error) -> Option<CredentialKind> {
        match Self::find(err) {
            Some(TryOnError::MissingCredential { provider }) => Some(*provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Context;

    use super::TryOnError;
    use crate::credentials::CredentialKind;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(TryOnError::validation("x")
            .to_string()
            .starts_with("validation error:"));
        assert!(TryOnError::composite("x")
            .to_string()
            .starts_with("composite error:"));
        assert!(TryOnError::video("x").to_string().starts_with("video error:"));
        assert_eq!(
            TryOnError::provider("gemini", "No image generated by the model.").to_string(),
            "gemini: No image generated by the model."
        );
    }

    #[test]
    fn missing_credential_names_the_keys_command() {
        let err = TryOnError::MissingCredential {
            provider: CredentialKind::Wavespeed,
        };
        let text = err.to_string();
        assert!(text.contains("Wavespeed"));
        assert!(text.contains("atelier keys set wavespeed"));
    }

    #[test]
    fn timeout_reports_waited_seconds() {
        let err = TryOnError::Timeout {
            waited: Duration::from_millis(2500),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 2.5s waiting for the render job"
        );
    }

    #[test]
    fn find_sees_through_context_layers() {
        let err = anyhow::Error::new(TryOnError::MissingCredential {
            provider: CredentialKind::Gemini,
        })
        .context("try-on aborted");
        let wrapped: anyhow::Result<()> = Err(err).context("outer");
        let err = wrapped.unwrap_err();
        assert_eq!(
            TryOnError::missing_credential(&err),
            Some(CredentialKind::Gemini)
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = TryOnError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
