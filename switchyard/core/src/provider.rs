//! Provider Traits
//!
//! Trait definitions for upstream model providers. The dispatcher treats a
//! provider as an opaque capability: hand it a request, get back a reply or
//! an error. Implementations handle provider-specific details (API formats,
//! auth, transport).
//!
//! Providers must tolerate being retried; the dispatcher makes no
//! exactly-once promise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::request::{Request, ToolCall};

/// Raw reply from a provider invocation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    /// Whether the provider reports success
    pub success: bool,

    /// Answer text
    pub content: Option<String>,

    /// Error text reported by the provider
    pub error: Option<String>,

    /// Latency reported by the provider, in milliseconds
    pub latency_ms: u64,

    /// Provider that produced the reply
    pub provider: String,

    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,
}

impl ProviderReply {
    /// Successful reply with content
    pub fn ok(provider: impl Into<String>, content: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            latency_ms,
            provider: provider.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Failed reply with an error message
    pub fn err(provider: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            latency_ms,
            provider: provider.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Attach tool calls
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Validate the reply, turning reported failures and empty content into errors
    ///
    /// # Errors
    ///
    /// Returns `ProviderInvocation` when the provider reports failure and
    /// `MalformedReply` when it reports success without any content.
    pub fn validate(self, provider: &str) -> Result<ValidReply, DispatchError> {
        if !self.success {
            return Err(DispatchError::ProviderInvocation {
                provider: provider.to_string(),
                message: self
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            });
        }

        match self.content {
            Some(content) if !content.trim().is_empty() => Ok(ValidReply {
                content,
                latency_ms: self.latency_ms,
                tool_calls: self.tool_calls,
            }),
            _ if !self.tool_calls.is_empty() => Ok(ValidReply {
                content: String::new(),
                latency_ms: self.latency_ms,
                tool_calls: self.tool_calls,
            }),
            _ => Err(DispatchError::MalformedReply {
                provider: provider.to_string(),
            }),
        }
    }
}

/// A reply that passed validation
#[derive(Clone, Debug, PartialEq)]
pub struct ValidReply {
    /// Answer text
    pub content: String,
    /// Reported latency in milliseconds
    pub latency_ms: u64,
    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,
}

/// Upstream model provider
///
/// Implement this trait to plug a model API into the dispatcher.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, matching the `name` in configuration
    fn name(&self) -> &str;

    /// Invoke the model
    ///
    /// Transport-level failures are returned as `Err`; model-level failures
    /// may also be reported through `ProviderReply::success = false`.
    async fn invoke(&self, request: &Request) -> anyhow::Result<ProviderReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_success() {
        let reply = ProviderReply::ok("alpha", "hello", 12);
        let valid = reply.validate("alpha").unwrap();
        assert_eq!(valid.content, "hello");
        assert_eq!(valid.latency_ms, 12);
    }

    #[test]
    fn test_validate_reported_failure() {
        let reply = ProviderReply::err("alpha", "rate limited", 5);
        let err = reply.validate("alpha").unwrap_err();
        assert_eq!(
            err,
            DispatchError::ProviderInvocation {
                provider: "alpha".to_string(),
                message: "rate limited".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_success_without_content_is_malformed() {
        let reply = ProviderReply {
            success: true,
            provider: "alpha".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            reply.validate("alpha"),
            Err(DispatchError::MalformedReply { .. })
        ));

        let blank = ProviderReply::ok("alpha", "   ", 1);
        assert!(matches!(
            blank.validate("alpha"),
            Err(DispatchError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_validate_tool_calls_only() {
        let reply = ProviderReply {
            success: true,
            provider: "alpha".to_string(),
            ..Default::default()
        }
        .with_tool_calls(vec![ToolCall {
            name: "lookup".to_string(),
            arguments: serde_json::json!({"q": "x"}),
        }]);

        let valid = reply.validate("alpha").unwrap();
        assert!(valid.content.is_empty());
        assert_eq!(valid.tool_calls.len(), 1);
    }
}
