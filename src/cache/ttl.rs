//! # TTL Policy
//!
//! Resolves how long an entry of a given data type may live. Three layers
//! with strict precedence: per-service override, global default, then the
//! standard tier as fallback. Resolution never fails.

use crate::config::TtlConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Platform-wide named lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlTier {
    /// Volatile data such as execution state
    Short,
    /// Configuration-like data
    Standard,
    /// Stable data: conversation history, embeddings
    Extended,
    /// No expiry
    Permanent,
}

impl TtlTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlTier::Short => "short",
            TtlTier::Standard => "standard",
            TtlTier::Extended => "extended",
            TtlTier::Permanent => "permanent",
        }
    }
}

impl fmt::Display for TtlTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured lifetime: either a named tier or explicit seconds.
///
/// In TOML: `agent_config = "short"` or `agent_tools = 90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TtlSetting {
    Tier(TtlTier),
    Seconds(u64),
}

impl From<TtlTier> for TtlSetting {
    fn from(tier: TtlTier) -> Self {
        TtlSetting::Tier(tier)
    }
}

/// Resolved lifetime of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    After(Duration),
    Never,
}

impl Expiry {
    pub fn from_secs(seconds: u64) -> Self {
        Expiry::After(Duration::from_secs(seconds))
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Expiry::After(ttl) => Some(*ttl),
            Expiry::Never => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Expiry::Never)
    }

    /// Bound this lifetime by `cap`; a permanent entry becomes `cap`
    pub fn capped(self, cap: Duration) -> Self {
        match self {
            Expiry::After(ttl) => Expiry::After(ttl.min(cap)),
            Expiry::Never => Expiry::After(cap),
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::After(ttl) => write!(f, "{}s", ttl.as_secs()),
            Expiry::Never => f.write_str("permanent"),
        }
    }
}

/// Immutable TTL resolution table built once at startup
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    short: Duration,
    standard: Duration,
    extended: Duration,
    defaults: HashMap<String, TtlSetting>,
    services: HashMap<String, HashMap<String, TtlSetting>>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&TtlConfig::default())
    }
}

impl TtlPolicy {
    pub fn from_config(config: &TtlConfig) -> Self {
        Self {
            short: Duration::from_secs(config.short_seconds),
            standard: Duration::from_secs(config.standard_seconds),
            extended: Duration::from_secs(config.extended_seconds),
            defaults: config.defaults.clone(),
            services: config.services.clone(),
        }
    }

    /// Resolve the lifetime for `data_type`, consulting the overrides of
    /// `service_scope` first.
    ///
    /// Unknown types resolve to the configured standard tier.
    pub fn resolve(&self, service_scope: Option<&str>, data_type: &str) -> Expiry {
        let service_override = service_scope
            .and_then(|scope| self.services.get(scope))
            .and_then(|overrides| overrides.get(data_type));

        match service_override.or_else(|| self.defaults.get(data_type)) {
            Some(setting) => self.setting(*setting),
            None => self.tier(TtlTier::Standard),
        }
    }

    /// Lifetime of a named tier under this policy's tier durations
    pub fn tier(&self, tier: TtlTier) -> Expiry {
        match tier {
            TtlTier::Short => Expiry::After(self.short),
            TtlTier::Standard => Expiry::After(self.standard),
            TtlTier::Extended => Expiry::After(self.extended),
            TtlTier::Permanent => Expiry::Never,
        }
    }

    pub fn setting(&self, setting: TtlSetting) -> Expiry {
        match setting {
            TtlSetting::Tier(tier) => self.tier(tier),
            // Zero would make the distributed tier reject the write
            TtlSetting::Seconds(seconds) => Expiry::from_secs(seconds.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TtlPolicy {
        let mut config = TtlConfig::default();
        config.defaults.insert("widget".to_string(), TtlSetting::Seconds(42));
        config.services.insert(
            "agents".to_string(),
            HashMap::from([
                ("agent_config".to_string(), TtlSetting::Tier(TtlTier::Short)),
                ("widget".to_string(), TtlSetting::Tier(TtlTier::Permanent)),
            ]),
        );
        TtlPolicy::from_config(&config)
    }

    #[test]
    fn test_service_override_wins() {
        let policy = policy();
        assert_eq!(
            policy.resolve(Some("agents"), "agent_config"),
            Expiry::from_secs(300)
        );
        assert_eq!(policy.resolve(Some("agents"), "widget"), Expiry::Never);
    }

    #[test]
    fn test_global_default_when_no_override() {
        let policy = policy();
        assert_eq!(policy.resolve(None, "agent_config"), Expiry::from_secs(3_600));
        assert_eq!(policy.resolve(Some("jobs"), "widget"), Expiry::from_secs(42));
        assert_eq!(policy.resolve(None, "embedding"), Expiry::from_secs(86_400));
    }

    #[test]
    fn test_unknown_type_falls_back_to_standard() {
        let policy = policy();
        assert_eq!(
            policy.resolve(Some("unknown_scope"), "never_declared"),
            Expiry::from_secs(3_600)
        );
    }

    #[test]
    fn test_tier_durations_follow_config() {
        let config = TtlConfig {
            short_seconds: 10,
            ..TtlConfig::default()
        };
        let policy = TtlPolicy::from_config(&config);
        assert_eq!(policy.tier(TtlTier::Short), Expiry::from_secs(10));
        assert_eq!(policy.resolve(None, "job_status"), Expiry::from_secs(10));
    }

    #[test]
    fn test_unknown_type_uses_configured_standard_tier() {
        let config = TtlConfig {
            standard_seconds: 900,
            ..TtlConfig::default()
        };
        let policy = TtlPolicy::from_config(&config);
        assert_eq!(policy.resolve(None, "never_declared"), Expiry::from_secs(900));
    }

    #[test]
    fn test_zero_seconds_is_clamped() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.setting(TtlSetting::Seconds(0)), Expiry::from_secs(1));
    }

    #[test]
    fn test_expiry_capping() {
        let cap = Duration::from_secs(60);
        assert_eq!(Expiry::Never.capped(cap), Expiry::After(cap));
        assert_eq!(Expiry::from_secs(10).capped(cap), Expiry::from_secs(10));
        assert_eq!(Expiry::from_secs(600).capped(cap), Expiry::After(cap));
    }

    #[test]
    fn test_setting_deserializes_tier_or_seconds() {
        let tier: TtlSetting = serde_json::from_str("\"extended\"").unwrap();
        assert_eq!(tier, TtlSetting::Tier(TtlTier::Extended));
        let seconds: TtlSetting = serde_json::from_str("90").unwrap();
        assert_eq!(seconds, TtlSetting::Seconds(90));
    }
}
