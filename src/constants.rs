//! # System Constants
//!
//! Data type tags, key grammar tags and built-in defaults shared by every
//! consumer of the cache engine.

/// Data type tags used by the platform's consumers
pub mod data_types {
    // Agent configuration
    pub const AGENT: &str = "agent";
    pub const AGENT_CONFIG: &str = "agent_config";
    pub const AGENT_TOOLS: &str = "agent_tools";
    pub const AGENT_EXECUTION_STATE: &str = "agent_execution_state";

    // Conversation memory
    pub const CONVERSATION: &str = "conversation";
    pub const CONVERSATION_MEMORY: &str = "conversation_memory";
    pub const CONVERSATION_MESSAGE: &str = "conversation_message";

    // RAG collections and query results
    pub const COLLECTION: &str = "collection";
    pub const COLLECTION_METADATA: &str = "collection_metadata";
    pub const RAG_QUERY: &str = "rag_query";

    // Job-queue metadata
    pub const JOB: &str = "job";
    pub const JOB_STATUS: &str = "job_status";
    pub const JOB_RESULT: &str = "job_result";

    // Numeric vectors
    pub const EMBEDDING: &str = "embedding";
    pub const QUERY_EMBEDDING: &str = "query_embedding";
}

/// Segment tags of the rendered key grammar.
///
/// Order matters: keys always render tags in this order so that group
/// patterns can anchor on a segment.
pub mod key_tags {
    pub const TENANT: &str = "tenant";
    pub const DATA_TYPE: &str = "type";
    pub const AGENT: &str = "agent";
    pub const CONVERSATION: &str = "conv";
    pub const COLLECTION: &str = "coll";
    pub const MODEL: &str = "model";
    pub const RESOURCE: &str = "res";
}

/// Reserved tenant id meaning "no tenant"; never valid in a key
pub const NO_TENANT_SENTINEL: &str = "_none";

/// Default namespace prefix for every rendered key
pub const DEFAULT_KEY_PREFIX: &str = "tc";

/// Number of tiers in every lookup chain
pub const LOOKUP_TIERS: usize = 6;

/// TTL tier defaults in seconds
pub mod ttl {
    pub const SHORT_SECONDS: u64 = 300;
    pub const STANDARD_SECONDS: u64 = 3_600;
    pub const EXTENDED_SECONDS: u64 = 86_400;
}

/// Component names used for logging, metrics and circuit breakers
pub mod components {
    pub const DISTRIBUTED_STORE: &str = "distributed_store";
    pub const ORCHESTRATOR: &str = "cache_aside";
    pub const INVALIDATION: &str = "invalidation";
    pub const EMBEDDING_CACHE: &str = "embedding_cache";
}
