use proptest::prelude::*;
use proptest::strategy::Just;
use tiercache_core::cache::{CacheKey, TtlSetting, TtlTier};

/// Identifier-like segment values, including the glob and separator
/// characters that must be escaped
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9][a-z0-9_-]{0,31}",
        "[a-z0-9:*?\\[\\]\\\\ ]{1,16}",
    ]
}

pub fn tenant_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,23}"
}

pub fn data_type_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("agent".to_string()),
        Just("agent_config".to_string()),
        Just("conversation_memory".to_string()),
        Just("rag_query".to_string()),
        Just("job_status".to_string()),
        "[a-z][a-z_]{2,20}",
    ]
}

/// Keys with every combination of optional context
pub fn cache_key_strategy() -> impl Strategy<Value = CacheKey> {
    (
        tenant_strategy(),
        data_type_strategy(),
        segment_strategy(),
        prop::option::of(segment_strategy()),
        prop::option::of(segment_strategy()),
        prop::option::of(segment_strategy()),
    )
        .prop_map(|(tenant, data_type, resource, agent, conversation, collection)| {
            let mut key = CacheKey::new(tenant, data_type, resource);
            if let Some(agent) = agent {
                key = key.with_agent(agent);
            }
            if let Some(conversation) = conversation {
                key = key.with_conversation(conversation);
            }
            if let Some(collection) = collection {
                key = key.with_collection(collection);
            }
            key
        })
}

pub fn ttl_setting_strategy() -> impl Strategy<Value = TtlSetting> {
    prop_oneof![
        Just(TtlSetting::Tier(TtlTier::Short)),
        Just(TtlSetting::Tier(TtlTier::Standard)),
        Just(TtlSetting::Tier(TtlTier::Extended)),
        Just(TtlSetting::Tier(TtlTier::Permanent)),
        (0u64..1_000_000).prop_map(TtlSetting::Seconds),
    ]
}

/// Finite embedding components; NaN never compares equal
pub fn embedding_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6f64..1.0e6, 0..64)
}

/// Any finite float, subnormals included
pub fn finite_f64_strategy() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
}

pub fn json_value_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        finite_f64_strategy()
            .prop_map(|t| serde_json::json!({"name": "support-bot", "temperature": t})),
        prop::collection::vec(finite_f64_strategy(), 0..8)
            .prop_map(|scores| serde_json::json!({ "scores": scores })),
        Just(serde_json::json!({"tools": ["search", "calculator"], "enabled": true})),
        Just(serde_json::json!({"nested": {"messages": [1, 2, 3]}})),
        "[a-zA-Z0-9 ]{0,40}".prop_map(|s| serde_json::json!({ "text": s })),
        (0i64..10_000).prop_map(|n| serde_json::json!({ "count": n })),
    ]
}
