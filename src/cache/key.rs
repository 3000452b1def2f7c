//! # Key Builder
//!
//! Hierarchical, tenant-scoped cache keys and the fixed six-tier lookup
//! chain derived from them.
//!
//! Every rendered key follows one grammar, tags always in this order:
//!
//! ```text
//! {prefix}:tenant:<t>:type:<dt>[:agent:<a>][:conv:<c>][:coll:<x>]:res:<r>
//! ```
//!
//! Segment values are percent-escaped for `%`, `:` and the glob
//! metacharacters, so a value can never forge a separator or widen a
//! deletion pattern. A context or resource value spelled like one of the
//! context tags has its first character escaped too, so every `:<tag>:`
//! in a key is a real tag.

use crate::constants::{key_tags, DEFAULT_KEY_PREFIX, LOOKUP_TIERS, NO_TENANT_SENTINEL};
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

/// Optional context segments of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    Agent,
    Conversation,
    Collection,
}

impl ContextField {
    /// Tag rendered in the key grammar
    pub fn tag(&self) -> &'static str {
        match self {
            ContextField::Agent => key_tags::AGENT,
            ContextField::Conversation => key_tags::CONVERSATION,
            ContextField::Collection => key_tags::COLLECTION,
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextField::Agent => f.write_str("agent"),
            ContextField::Conversation => f.write_str("conversation"),
            ContextField::Collection => f.write_str("collection"),
        }
    }
}

/// Identifies one cached resource for one tenant.
///
/// Construction is infallible; [`KeyBuilder::build`] rejects an empty or
/// reserved tenant and an empty resource id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    tenant_id: String,
    data_type: String,
    agent_id: Option<String>,
    conversation_id: Option<String>,
    collection_id: Option<String>,
    resource_id: String,
}

impl CacheKey {
    pub fn new(
        tenant_id: impl Into<String>,
        data_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            data_type: data_type.into(),
            agent_id: None,
            conversation_id: None,
            collection_id: None,
            resource_id: resource_id.into(),
        }
    }

    pub fn with_agent(self, agent_id: impl Into<String>) -> Self {
        self.with_context(ContextField::Agent, agent_id)
    }

    pub fn with_conversation(self, conversation_id: impl Into<String>) -> Self {
        self.with_context(ContextField::Conversation, conversation_id)
    }

    pub fn with_collection(self, collection_id: impl Into<String>) -> Self {
        self.with_context(ContextField::Collection, collection_id)
    }

    /// Set a context segment; an empty value leaves it absent
    pub fn with_context(mut self, field: ContextField, value: impl Into<String>) -> Self {
        let value = Some(value.into()).filter(|v| !v.is_empty());
        match field {
            ContextField::Agent => self.agent_id = value,
            ContextField::Conversation => self.conversation_id = value,
            ContextField::Collection => self.collection_id = value,
        }
        self
    }

    /// Same identity with a different data type
    pub fn for_data_type(&self, data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            ..self.clone()
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn collection_id(&self) -> Option<&str> {
        self.collection_id.as_deref()
    }

    pub fn context(&self, field: ContextField) -> Option<&str> {
        match field {
            ContextField::Agent => self.agent_id(),
            ContextField::Conversation => self.conversation_id(),
            ContextField::Collection => self.collection_id(),
        }
    }

    pub fn validate(&self) -> CacheResult<()> {
        validate_tenant(&self.tenant_id)?;
        if self.data_type.is_empty() {
            return Err(CacheError::Validation("data_type must not be empty".to_string()));
        }
        if self.resource_id.is_empty() {
            return Err(CacheError::Validation(format!(
                "resource_id must not be empty (tenant '{}', type '{}')",
                self.tenant_id, self.data_type
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_tenant(tenant_id: &str) -> CacheResult<()> {
    if tenant_id.is_empty() {
        return Err(CacheError::Validation("tenant_id must not be empty".to_string()));
    }
    if tenant_id == NO_TENANT_SENTINEL {
        return Err(CacheError::Validation(format!(
            "tenant_id '{NO_TENANT_SENTINEL}' is reserved"
        )));
    }
    Ok(())
}

/// Ordered concrete keys for one [`CacheKey`], most specific first.
///
/// Always [`LOOKUP_TIERS`] long. When optional fields are absent several
/// tiers render the same string; [`KeyLookupChain::distinct`] skips repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookupChain {
    keys: Vec<String>,
}

impl KeyLookupChain {
    /// The most specific key, where populate writes
    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, tier: usize) -> Option<&str> {
        self.keys.get(tier).map(String::as_str)
    }

    /// `(tier_index, key)` pairs in order, skipping keys already yielded
    pub fn distinct(&self) -> impl Iterator<Item = (usize, &str)> {
        self.keys
            .iter()
            .enumerate()
            .filter(|(index, key)| !self.keys[..*index].contains(key))
            .map(|(index, key)| (index, key.as_str()))
    }

    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}

impl<'a> IntoIterator for &'a KeyLookupChain {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Which context segments a tier keeps: (agent, conversation, collection)
const TIER_SHAPES: [(bool, bool, bool); LOOKUP_TIERS] = [
    (true, true, true),
    (true, true, false),
    (true, false, true),
    (false, true, false),
    (true, false, false),
    (false, false, false),
];

/// Renders keys and deletion patterns under one namespace prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the six-tier lookup chain. Pure and deterministic.
    pub fn build(&self, key: &CacheKey) -> CacheResult<KeyLookupChain> {
        key.validate()?;

        let keys = TIER_SHAPES
            .iter()
            .map(|&(agent, conversation, collection)| {
                self.render(
                    key,
                    key.agent_id().filter(|_| agent),
                    key.conversation_id().filter(|_| conversation),
                    key.collection_id().filter(|_| collection),
                )
            })
            .collect();

        Ok(KeyLookupChain { keys })
    }

    /// Most specific key only
    pub fn primary_key(&self, key: &CacheKey) -> CacheResult<String> {
        key.validate()?;
        Ok(self.render(
            key,
            key.agent_id(),
            key.conversation_id(),
            key.collection_id(),
        ))
    }

    fn render(
        &self,
        key: &CacheKey,
        agent: Option<&str>,
        conversation: Option<&str>,
        collection: Option<&str>,
    ) -> String {
        let mut rendered = self.type_base(key.tenant_id(), key.data_type());
        for (tag, value) in [
            (key_tags::AGENT, agent),
            (key_tags::CONVERSATION, conversation),
            (key_tags::COLLECTION, collection),
        ] {
            if let Some(value) = value {
                push_value(&mut rendered, tag, value);
            }
        }
        push_value(&mut rendered, key_tags::RESOURCE, key.resource_id());
        rendered
    }

    fn tenant_base(&self, tenant_id: &str) -> String {
        let mut base = self.prefix.clone();
        push_segment(&mut base, key_tags::TENANT, tenant_id);
        base
    }

    fn type_base(&self, tenant_id: &str, data_type: &str) -> String {
        let mut base = self.tenant_base(tenant_id);
        push_segment(&mut base, key_tags::DATA_TYPE, data_type);
        base
    }

    /// Every contextual variant of one resource:
    /// `{prefix}:tenant:<t>:type:<dt>:*res:<r>`
    pub fn resource_pattern(
        &self,
        tenant_id: &str,
        data_type: &str,
        resource_id: &str,
    ) -> CacheResult<String> {
        validate_tenant(tenant_id)?;
        if resource_id.is_empty() {
            return Err(CacheError::Validation("resource_id must not be empty".to_string()));
        }
        Ok(format!(
            "{}:*{}:{}",
            self.type_base(tenant_id, data_type),
            key_tags::RESOURCE,
            escape_value(resource_id)
        ))
    }

    /// Every entry of `data_type` carrying a context segment, e.g. all
    /// messages of one conversation:
    /// `{prefix}:tenant:<t>:type:conversation_message:*conv:<c>:*`
    pub fn group_pattern(
        &self,
        tenant_id: &str,
        data_type: &str,
        field: ContextField,
        value: &str,
    ) -> CacheResult<String> {
        validate_tenant(tenant_id)?;
        if value.is_empty() {
            return Err(CacheError::Validation(format!(
                "{field} id must not be empty for a group pattern"
            )));
        }
        Ok(format!(
            "{}:*{}:{}:*",
            self.type_base(tenant_id, data_type),
            field.tag(),
            escape_value(value)
        ))
    }

    /// Every entry of one data type for a tenant
    pub fn data_type_pattern(&self, tenant_id: &str, data_type: &str) -> CacheResult<String> {
        validate_tenant(tenant_id)?;
        Ok(format!("{}:*", self.type_base(tenant_id, data_type)))
    }

    /// Every entry of a tenant
    pub fn tenant_pattern(&self, tenant_id: &str) -> CacheResult<String> {
        validate_tenant(tenant_id)?;
        Ok(format!("{}:*", self.tenant_base(tenant_id)))
    }

    /// Content-addressed embedding key: the resource segment is the hex
    /// SHA-256 of `(model, text)`
    pub fn embedding_key(
        &self,
        tenant_id: &str,
        data_type: &str,
        model: &str,
        text: &str,
    ) -> CacheResult<String> {
        validate_tenant(tenant_id)?;
        let mut key = self.type_base(tenant_id, data_type);
        push_value(&mut key, key_tags::MODEL, model);
        push_value(&mut key, key_tags::RESOURCE, &content_hash(model, text));
        Ok(key)
    }
}

/// Hex SHA-256 over the model name and text, NUL separated
pub fn content_hash(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn push_segment(key: &mut String, tag: &str, value: &str) {
    key.push(':');
    key.push_str(tag);
    key.push(':');
    key.push_str(&escape_segment(value));
}

fn push_value(key: &mut String, tag: &str, value: &str) {
    key.push(':');
    key.push_str(tag);
    key.push(':');
    key.push_str(&escape_value(value));
}

/// Tags that may follow the data type segment
const VALUE_TAGS: [&str; 5] = [
    key_tags::AGENT,
    key_tags::CONVERSATION,
    key_tags::COLLECTION,
    key_tags::MODEL,
    key_tags::RESOURCE,
];

/// [`escape_segment`] for context, model and resource values. A value equal
/// to a tag gets its first character percent-escaped: the segment after a
/// value is always a tag, so `*<tag>:<value>:` in a pattern can then only
/// line up on the real tag.
pub fn escape_value(value: &str) -> Cow<'_, str> {
    if !VALUE_TAGS.contains(&value) {
        return escape_segment(value);
    }
    let mut chars = value.chars();
    let mut escaped = String::with_capacity(value.len() + 2);
    if let Some(first) = chars.next() {
        escaped.push_str(&format!("%{:02X}", u32::from(first)));
    }
    escaped.push_str(chars.as_str());
    Cow::Owned(escaped)
}

/// Percent-escape separator and glob characters in a segment value
pub fn escape_segment(value: &str) -> Cow<'_, str> {
    if !value.chars().any(needs_escape) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '*' => escaped.push_str("%2A"),
            '?' => escaped.push_str("%3F"),
            '[' => escaped.push_str("%5B"),
            ']' => escaped.push_str("%5D"),
            '\\' => escaped.push_str("%5C"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn needs_escape(c: char) -> bool {
    matches!(c, '%' | ':' | '*' | '?' | '[' | ']' | '\\')
}
