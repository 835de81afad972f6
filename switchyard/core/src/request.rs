//! Requests and Responses
//!
//! The caller-facing data model. A [`Request`] is immutable once handed to
//! the dispatcher (it is only ever borrowed); a [`Response`] is always
//! returned, successful or not.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Request
// ============================================================================

/// Budget tier the caller is willing to pay for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetTier {
    /// Cheapest acceptable answer
    Economy,
    /// Default tier
    #[default]
    Standard,
    /// Quality first
    Premium,
}

impl BudgetTier {
    /// Stable string form, used in cache fingerprints
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

/// Caller context attached to a request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Business domain the request belongs to (e.g. "infrastructure")
    pub domain: String,

    /// Budget tier
    pub budget_tier: BudgetTier,

    /// Locale of the expected answer (e.g. "en-US")
    pub locale: String,

    /// Correlation ID propagated from the caller
    pub correlation_id: Option<String>,

    /// Free-form metadata, not part of the cache fingerprint
    pub metadata: HashMap<String, String>,
}

/// A tool the model may call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema of the parameters
    pub parameters: serde_json::Value,
}

/// An inference request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID
    pub request_id: String,

    /// The prompt to send
    pub prompt: String,

    /// Caller context
    pub context: RequestContext,

    /// Tools offered to the model
    pub tools: Vec<ToolSpec>,

    /// Explicitly requested provider (optional)
    pub provider: Option<String>,
}

impl Request {
    /// Create a new request with default context
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            context: RequestContext::default(),
            tools: Vec::new(),
            provider: None,
        }
    }

    /// Set the domain
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.context.domain = domain.into();
        self
    }

    /// Set the locale
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.context.locale = locale.into();
        self
    }

    /// Set the budget tier
    #[must_use]
    pub fn with_budget_tier(mut self, tier: BudgetTier) -> Self {
        self.context.budget_tier = tier;
        self
    }

    /// Set the correlation ID
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.context.correlation_id = Some(id.into());
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.metadata.insert(key.into(), value.into());
        self
    }

    /// Offer a tool to the model
    #[must_use]
    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    /// Pin a preferred provider
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

// ============================================================================
// Response
// ============================================================================

/// A tool call returned by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Arguments as JSON
    pub arguments: serde_json::Value,
}

/// Result of a dispatched request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether a provider produced an answer
    pub success: bool,

    /// Answer text (on success)
    pub content: Option<String>,

    /// Error text (on failure)
    pub error: Option<String>,

    /// Provider that answered
    pub provider: Option<String>,

    /// ID of the originating request
    pub request_id: String,

    /// Wall-clock time spent in the dispatcher
    pub processing_time_ms: u64,

    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,

    /// Whether this response was served from the cache
    pub cached: bool,

    /// Number of provider invocations made for this call
    pub attempts: u32,
}

impl Response {
    /// Build a successful response
    pub fn success(
        request_id: impl Into<String>,
        provider: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            provider: Some(provider.into()),
            request_id: request_id.into(),
            processing_time_ms: 0,
            tool_calls: Vec::new(),
            cached: false,
            attempts: 0,
        }
    }

    /// Build a failed response
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            provider: None,
            request_id: request_id.into(),
            processing_time_ms: 0,
            tool_calls: Vec::new(),
            cached: false,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::new("Why is the deploy slow?")
            .with_domain("infrastructure")
            .with_locale("en-GB")
            .with_budget_tier(BudgetTier::Premium)
            .with_correlation_id("corr-1")
            .with_metadata("team", "sre")
            .with_provider("alpha");

        assert_eq!(request.prompt, "Why is the deploy slow?");
        assert_eq!(request.context.domain, "infrastructure");
        assert_eq!(request.context.locale, "en-GB");
        assert_eq!(request.context.budget_tier, BudgetTier::Premium);
        assert_eq!(request.context.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(request.context.metadata.get("team").map(String::as_str), Some("sre"));
        assert_eq!(request.provider.as_deref(), Some("alpha"));
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(Request::new("a").request_id, Request::new("a").request_id);
    }

    #[test]
    fn test_budget_tier_serde() {
        let json = serde_json::to_string(&BudgetTier::Economy).unwrap();
        assert_eq!(json, "\"economy\"");
        let tier: BudgetTier = serde_json::from_str("\"premium\"").unwrap();
        assert_eq!(tier, BudgetTier::Premium);
    }

    #[test]
    fn test_response_constructors() {
        let ok = Response::success("r1", "alpha", "hello");
        assert!(ok.success);
        assert_eq!(ok.content.as_deref(), Some("hello"));
        assert!(ok.error.is_none());

        let err = Response::failure("r2", "boom");
        assert!(!err.success);
        assert!(err.content.is_none());
        assert_eq!(err.error.as_deref(), Some("boom"));
        assert!(err.provider.is_none());
    }
}
