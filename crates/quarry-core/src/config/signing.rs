//! Cursor signing configuration.
//!
//! A missing signing secret fails closed: cursors cannot be decoded at all
//! rather than being silently treated as trusted. Deployments that really
//! want to run without a provisioned secret (local development) must opt in
//! explicitly, which generates an ephemeral random secret — tokens then
//! survive only as long as the process.

use serde::{Deserialize, Serialize};

/// An HMAC signing secret. Not serializable; never appears in logs or
/// error messages.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(..)")
    }
}

/// Configuration for the pagination-cursor codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// The signing secret, normally sourced from a secret manager by the
    /// embedding application.
    #[serde(skip)]
    pub secret: Option<Vec<u8>>,

    /// Explicit opt-in to an ephemeral, process-local dev secret when no
    /// secret is configured. Never enable outside local development.
    #[serde(default)]
    pub allow_insecure_dev_secret: bool,

    /// Default time-to-live for cursors that do not carry their own
    /// `max_age_s`, in seconds.
    #[serde(default = "default_max_age_s")]
    pub default_max_age_s: u64,

    /// Tolerated forward clock skew when checking `issued_at`, in seconds.
    #[serde(default = "default_clock_skew_s")]
    pub clock_skew_s: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: None,
            allow_insecure_dev_secret: false,
            default_max_age_s: default_max_age_s(),
            clock_skew_s: default_clock_skew_s(),
        }
    }
}

impl SigningConfig {
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Resolve the effective signing secret.
    ///
    /// Returns `None` when no secret is configured and the insecure-dev
    /// opt-in is off; the codec then fails closed on every decode.
    pub fn resolve_secret(&self) -> Option<SigningSecret> {
        if let Some(secret) = &self.secret {
            return Some(SigningSecret::new(secret.clone()));
        }
        if self.allow_insecure_dev_secret {
            tracing::warn!(
                "no cursor signing secret configured; using an ephemeral dev secret — \
                 cursors will not survive a restart"
            );
            let mut bytes = [0u8; 32];
            rand::fill(&mut bytes);
            return Some(SigningSecret::new(bytes.to_vec()));
        }
        None
    }
}

fn default_max_age_s() -> u64 {
    3_600
}

fn default_clock_skew_s() -> u64 {
    30
}
