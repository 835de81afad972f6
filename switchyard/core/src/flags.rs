//! Feature Flags
//!
//! Provider enablement and feature switches are owned by an external flag
//! store. The dispatcher only reads them, once per dispatch, through the
//! [`FlagSource`] capability.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Flag consulted before using the response cache
pub const FLAG_RESPONSE_CACHE: &str = "response_cache";

/// Flag that forces domain-specific ordering
pub const FLAG_SMART_ROUTING: &str = "smart_routing";

/// Read-only view of an externally mutable flag store
pub trait FlagSource: Send + Sync {
    /// Whether the provider may receive traffic
    fn is_provider_enabled(&self, provider: &str) -> bool;

    /// Whether a named feature flag is on
    fn is_enabled(&self, flag: &str) -> bool;
}

/// In-process flag store
///
/// Providers are enabled unless explicitly disabled. Feature flags fall back
/// to a per-flag default when unset.
#[derive(Debug, Default)]
pub struct StaticFlags {
    disabled_providers: RwLock<HashSet<String>>,
    flags: RwLock<HashMap<String, bool>>,
}

impl StaticFlags {
    /// Create a flag store with everything enabled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable a provider
    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) {
        let mut disabled = self.disabled_providers.write();
        if enabled {
            disabled.remove(provider);
        } else {
            disabled.insert(provider.to_string());
        }
    }

    /// Set a feature flag
    pub fn set_flag(&self, flag: &str, enabled: bool) {
        self.flags.write().insert(flag.to_string(), enabled);
    }

    /// Whether a feature flag has been set explicitly
    #[must_use]
    pub fn is_set(&self, flag: &str) -> bool {
        self.flags.read().contains_key(flag)
    }
}

impl FlagSource for StaticFlags {
    fn is_provider_enabled(&self, provider: &str) -> bool {
        !self.disabled_providers.read().contains(provider)
    }

    fn is_enabled(&self, flag: &str) -> bool {
        self.flags
            .read()
            .get(flag)
            .copied()
            .unwrap_or_else(|| default_for(flag))
    }
}

/// Default state of flags that were never set
fn default_for(flag: &str) -> bool {
    // Cache is on unless switched off; everything else is opt-in
    flag == FLAG_RESPONSE_CACHE
}
