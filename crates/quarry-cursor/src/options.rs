//! Decode-side options shared by both cursor variants.

use quarry_core::{SigningConfig, SigningSecret};

use crate::envelope::FreshnessPolicy;

/// Everything a decode needs besides the token itself. The clock is passed
/// in explicitly so callers (and tests) control it.
pub struct DecodeOptions<'a> {
    /// The resolved signing secret. `None` fails every decode closed.
    pub secret: Option<&'a SigningSecret>,
    /// Reject tokens without `issued_at` (the default).
    pub require_issued_at: bool,
    /// Max age applied when the token carries none.
    pub default_max_age_s: Option<u64>,
    /// Tolerated forward clock skew, in seconds.
    pub clock_skew_s: u64,
    /// Strict replay binding: when set and the token carries a `query_fp`,
    /// the two must match.
    pub expected_query_fp: Option<&'a str>,
    /// Current time, seconds since the epoch.
    pub now_epoch_s: i64,
}

impl<'a> DecodeOptions<'a> {
    pub fn new(secret: Option<&'a SigningSecret>, now_epoch_s: i64) -> Self {
        Self {
            secret,
            require_issued_at: true,
            default_max_age_s: None,
            clock_skew_s: 30,
            expected_query_fp: None,
            now_epoch_s,
        }
    }

    /// Build options from a [`SigningConfig`] and an already-resolved
    /// secret.
    pub fn from_config(
        config: &SigningConfig,
        secret: Option<&'a SigningSecret>,
        now_epoch_s: i64,
    ) -> Self {
        Self {
            secret,
            require_issued_at: true,
            default_max_age_s: Some(config.default_max_age_s),
            clock_skew_s: config.clock_skew_s,
            expected_query_fp: None,
            now_epoch_s,
        }
    }

    /// Opt into accepting legacy tokens without `issued_at`.
    pub fn accept_legacy_issued_at(mut self) -> Self {
        self.require_issued_at = false;
        self
    }

    pub fn with_default_max_age(mut self, seconds: u64) -> Self {
        self.default_max_age_s = Some(seconds);
        self
    }

    pub fn with_expected_query_fp(mut self, query_fp: &'a str) -> Self {
        self.expected_query_fp = Some(query_fp);
        self
    }

    pub(crate) fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy {
            require_issued_at: self.require_issued_at,
            default_max_age_s: self.default_max_age_s,
            clock_skew_s: self.clock_skew_s,
        }
    }
}
