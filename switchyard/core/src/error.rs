//! Dispatch Errors
//!
//! Error taxonomy for the dispatch layer. Provider-level failures are
//! recovered locally by the retry/fallback loop and only ever reach callers
//! as the `error` text of a failed [`Response`](crate::request::Response).
//! Structural errors (missing routing rule, no providers configured) are
//! returned directly.

use thiserror::Error;

/// Errors produced while dispatching or routing a request
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The upstream provider returned an error
    #[error("{provider} failed: {message}")]
    ProviderInvocation {
        /// Provider that failed
        provider: String,
        /// Upstream error text
        message: String,
    },

    /// The upstream provider did not answer within the per-attempt timeout
    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider that timed out
        provider: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The provider claimed success but returned no usable content
    #[error("{provider} returned a malformed reply")]
    MalformedReply {
        /// Provider that replied
        provider: String,
    },

    /// Every configured provider was filtered out before the first attempt
    #[error("No available providers")]
    NoAvailableProvider,

    /// All attempt rounds were exhausted
    #[error("All providers failed: {last_error}")]
    AllProvidersFailed {
        /// Error from the final attempt
        last_error: String,
    },

    /// No routing rule exists for the operation type
    #[error("No routing rule for operation type '{operation_type}'")]
    NoRoutingRule {
        /// The unknown operation type
        operation_type: String,
    },

    /// The dispatcher was built without any providers
    #[error("No providers configured")]
    NoProvidersConfigured,

    /// A provider was named in configuration but has no implementation
    #[error("Unknown provider: {name}")]
    UnknownProvider {
        /// Provider name
        name: String,
    },
}

impl DispatchError {
    /// Whether this error came from a timed-out invocation
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
