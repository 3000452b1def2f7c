//! # Invalidation Coordinator
//!
//! Deletes every cached variant of a changed resource and, on request,
//! cascades through the declared dependency graph.
//!
//! The graph is loaded once at startup, validated acyclic and never mutated.
//! Traversal is breadth-first: all deletions of one level run concurrently,
//! and a visited set guarantees termination even for diamond-shaped graphs.
//!
//! Zero deletions are a normal outcome. Store failures are surfaced, since
//! a silently failed delete leaves stale data behind.

use super::call::CallContext;
use super::key::{ContextField, KeyBuilder};
use super::tiered::TieredStore;
use crate::config::InvalidationConfig;
use crate::constants::{components, data_types};
use crate::error::{CacheError, CacheResult, Phase};
use crate::logging::log_invalidation;
use crate::metrics::CacheEvent;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// How a dependent type is addressed from its parent's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyScope {
    /// Dependent entries share the parent's resource id
    #[default]
    SameResource,
    /// Dependent entries carry the parent id in their agent segment
    ByAgent,
    /// Dependent entries carry the parent id in their conversation segment
    ByConversation,
    /// Dependent entries carry the parent id in their collection segment
    ByCollection,
    /// Resolve the parent's conversations through [`ConversationLookup`];
    /// only followed when the request asks for conversation cascade
    RelatedConversations,
}

impl DependencyScope {
    fn group_field(&self) -> Option<ContextField> {
        match self {
            DependencyScope::ByAgent => Some(ContextField::Agent),
            DependencyScope::ByConversation => Some(ContextField::Conversation),
            DependencyScope::ByCollection => Some(ContextField::Collection),
            _ => None,
        }
    }
}

/// One edge of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub data_type: String,
    #[serde(default)]
    pub scope: DependencyScope,
}

impl DependencyRule {
    pub fn new(data_type: impl Into<String>, scope: DependencyScope) -> Self {
        Self {
            data_type: data_type.into(),
            scope,
        }
    }

    pub fn same_resource(data_type: impl Into<String>) -> Self {
        Self::new(data_type, DependencyScope::SameResource)
    }
}

/// Per-type invalidation behavior
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataTypeRule {
    /// Invalidating this type at id `x` also removes every entry whose
    /// `group_by` segment equals `x`
    pub group_by: Option<ContextField>,
}

/// Immutable `resource_type -> dependents` graph
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<DependencyRule>>,
    data_types: HashMap<String, DataTypeRule>,
}

impl DependencyGraph {
    /// Rejects cycles
    pub fn new(
        edges: HashMap<String, Vec<DependencyRule>>,
        data_types: HashMap<String, DataTypeRule>,
    ) -> CacheResult<Self> {
        let graph = Self { edges, data_types };
        graph.validate()?;
        Ok(graph)
    }

    /// The graph for the platform's own consumers
    pub fn platform_default() -> Self {
        use DependencyScope::*;

        let mut edges = HashMap::new();
        edges.insert(
            data_types::AGENT.to_string(),
            vec![
                DependencyRule::same_resource(data_types::AGENT_CONFIG),
                DependencyRule::same_resource(data_types::AGENT_TOOLS),
                DependencyRule::same_resource(data_types::AGENT_EXECUTION_STATE),
                DependencyRule::new(data_types::CONVERSATION, RelatedConversations),
            ],
        );
        edges.insert(
            data_types::CONVERSATION.to_string(),
            vec![
                DependencyRule::same_resource(data_types::CONVERSATION_MEMORY),
                DependencyRule::new(data_types::CONVERSATION_MESSAGE, ByConversation),
            ],
        );
        edges.insert(
            data_types::COLLECTION.to_string(),
            vec![
                DependencyRule::same_resource(data_types::COLLECTION_METADATA),
                DependencyRule::new(data_types::RAG_QUERY, ByCollection),
            ],
        );
        edges.insert(
            data_types::JOB.to_string(),
            vec![
                DependencyRule::same_resource(data_types::JOB_STATUS),
                DependencyRule::same_resource(data_types::JOB_RESULT),
            ],
        );

        let mut rules = HashMap::new();
        rules.insert(
            data_types::CONVERSATION_MESSAGE.to_string(),
            DataTypeRule {
                group_by: Some(ContextField::Conversation),
            },
        );
        rules.insert(
            data_types::RAG_QUERY.to_string(),
            DataTypeRule {
                group_by: Some(ContextField::Collection),
            },
        );

        Self {
            edges,
            data_types: rules,
        }
    }

    /// Built-in graph (unless disabled) with configured entries layered on
    /// top; a configured `dependencies.<type>` replaces the built-in list.
    pub fn from_config(config: &InvalidationConfig) -> CacheResult<Self> {
        let base = if config.use_default_graph {
            Self::platform_default()
        } else {
            Self::default()
        };

        let mut edges = base.edges;
        let mut rules = base.data_types;
        for (resource_type, dependents) in &config.dependencies {
            edges.insert(resource_type.clone(), dependents.clone());
        }
        for (data_type, rule) in &config.data_types {
            rules.insert(data_type.clone(), rule.clone());
        }

        Self::new(edges, rules)
    }

    pub fn dependents(&self, resource_type: &str) -> &[DependencyRule] {
        self.edges
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn group_by(&self, data_type: &str) -> Option<ContextField> {
        self.data_types.get(data_type).and_then(|rule| rule.group_by)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    fn validate(&self) -> CacheResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }

        fn visit<'a>(
            graph: &'a DependencyGraph,
            node: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> CacheResult<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Active) => {
                    path.push(node);
                    return Err(CacheError::Configuration(format!(
                        "invalidation dependency cycle: {}",
                        path.join(" -> ")
                    )));
                }
                None => {}
            }

            marks.insert(node, Mark::Active);
            path.push(node);
            for rule in graph.dependents(node) {
                if rule.data_type.is_empty() {
                    return Err(CacheError::Configuration(format!(
                        "dependent of '{node}' has an empty data_type"
                    )));
                }
                visit(graph, &rule.data_type, marks, path)?;
            }
            path.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for node in self.edges.keys() {
            let mut path = Vec::new();
            visit(self, node, &mut marks, &mut path)?;
        }
        Ok(())
    }
}

/// What changed
#[derive(Debug, Clone)]
pub struct InvalidationRequest {
    pub resource_type: String,
    pub tenant_id: String,
    pub resource_id: String,
    /// Follow the dependency graph
    pub cascade: bool,
    /// Also follow agent -> conversation edges via [`ConversationLookup`]
    pub cascade_conversations: bool,
    pub cancellation: Option<CancellationToken>,
}

impl InvalidationRequest {
    pub fn new(
        resource_type: impl Into<String>,
        tenant_id: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            tenant_id: tenant_id.into(),
            resource_id: resource_id.into(),
            cascade: false,
            cascade_conversations: false,
            cancellation: None,
        }
    }

    pub fn with_cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Implies [`with_cascade`](Self::with_cascade)
    pub fn with_conversation_cascade(mut self) -> Self {
        self.cascade = true;
        self.cascade_conversations = true;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Deleted keys per data type plus the aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationCounts {
    pub by_type: BTreeMap<String, u64>,
    pub total: u64,
}

impl InvalidationCounts {
    pub fn get(&self, data_type: &str) -> Option<u64> {
        self.by_type.get(data_type).copied()
    }

    fn add(&mut self, data_type: &str, deleted: u64) {
        *self.by_type.entry(data_type.to_string()).or_insert(0) += deleted;
        self.total += deleted;
    }
}

/// Resolves the conversations that belong to an agent
#[async_trait]
pub trait ConversationLookup: Send + Sync {
    async fn related_conversations(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<Vec<String>>;
}

/// [`ConversationLookup`] over an async closure
pub struct FnLookup<F>(F);

/// Adapt an async closure `(tenant_id, agent_id)` into a [`ConversationLookup`]
pub fn lookup_fn<F, Fut>(f: F) -> FnLookup<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<String>>> + Send,
{
    FnLookup(f)
}

#[async_trait]
impl<F, Fut> ConversationLookup for FnLookup<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<String>>> + Send,
{
    async fn related_conversations(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        (self.0)(tenant_id.to_string(), agent_id.to_string()).await
    }
}

/// One unit of deletion work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
    /// Every variant of one resource (plus its group, if the type has one)
    Resource { data_type: String, resource_id: String },
    /// Every entry of a type carrying `value` in its `field` segment
    Group {
        data_type: String,
        field: ContextField,
        value: String,
    },
}

impl Target {
    fn data_type(&self) -> &str {
        match self {
            Target::Resource { data_type, .. } | Target::Group { data_type, .. } => data_type,
        }
    }
}

#[derive(Clone)]
pub struct InvalidationCoordinator {
    keys: KeyBuilder,
    store: TieredStore,
    graph: Arc<DependencyGraph>,
    conversations: Option<Arc<dyn ConversationLookup>>,
    lookup_timeout: Duration,
}

impl fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("keys", &self.keys)
            .field("graph", &self.graph)
            .field("conversation_lookup", &self.conversations.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

impl InvalidationCoordinator {
    pub fn new(
        keys: KeyBuilder,
        store: TieredStore,
        graph: Arc<DependencyGraph>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            keys,
            store,
            graph,
            conversations: None,
            lookup_timeout,
        }
    }

    pub fn with_conversation_lookup(mut self, lookup: Arc<dyn ConversationLookup>) -> Self {
        self.conversations = Some(lookup);
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    async fn delete_target(&self, tenant_id: &str, target: &Target) -> CacheResult<u64> {
        match target {
            Target::Resource {
                data_type,
                resource_id,
            } => {
                let pattern = self.keys.resource_pattern(tenant_id, data_type, resource_id)?;
                let mut deleted = self.store.delete_pattern(&pattern).await?;

                if let Some(field) = self.graph.group_by(data_type) {
                    let pattern =
                        self.keys
                            .group_pattern(tenant_id, data_type, field, resource_id)?;
                    deleted += self.store.delete_pattern(&pattern).await?;
                }
                Ok(deleted)
            }
            Target::Group {
                data_type,
                field,
                value,
            } => {
                let pattern = self.keys.group_pattern(tenant_id, data_type, *field, value)?;
                self.store.delete_pattern(&pattern).await
            }
        }
    }

    async fn related_conversations(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        agent_id: &str,
    ) -> CacheResult<Vec<String>> {
        let lookup = self.conversations.as_ref().ok_or_else(|| {
            CacheError::Configuration(
                "conversation cascade requested but no conversation lookup is configured"
                    .to_string(),
            )
        })?;

        ctx.bounded(Phase::Invalidate, Some(self.lookup_timeout), async {
            lookup
                .related_conversations(tenant_id, agent_id)
                .await
                .map_err(|e| CacheError::source(Phase::Invalidate, e))
        })
        .await
    }

    /// Next level of targets reachable from `target`
    async fn expand(
        &self,
        ctx: &CallContext,
        request: &InvalidationRequest,
        target: &Target,
        next: &mut Vec<Target>,
    ) -> CacheResult<()> {
        // Group targets carry no resource id to follow
        let Target::Resource {
            data_type,
            resource_id,
        } = target
        else {
            return Ok(());
        };

        for rule in self.graph.dependents(data_type) {
            match rule.scope {
                DependencyScope::SameResource => next.push(Target::Resource {
                    data_type: rule.data_type.clone(),
                    resource_id: resource_id.clone(),
                }),
                DependencyScope::RelatedConversations => {
                    if !request.cascade_conversations {
                        continue;
                    }
                    let conversations = self
                        .related_conversations(ctx, &request.tenant_id, resource_id)
                        .await?;
                    debug!(
                        agent_id = %resource_id,
                        conversations = conversations.len(),
                        "Cascading into related conversations"
                    );
                    next.extend(conversations.into_iter().filter(|c| !c.is_empty()).map(
                        |conversation_id| Target::Resource {
                            data_type: rule.data_type.clone(),
                            resource_id: conversation_id,
                        },
                    ));
                }
                scope => {
                    if let Some(field) = scope.group_field() {
                        next.push(Target::Group {
                            data_type: rule.data_type.clone(),
                            field,
                            value: resource_id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Invalidate one resource, and its dependents when `cascade` is set.
    ///
    /// Every type reached appears in the result, with 0 when nothing was
    /// cached.
    pub async fn invalidate(&self, request: InvalidationRequest) -> CacheResult<InvalidationCounts> {
        if request.resource_type.is_empty() {
            return Err(CacheError::Validation(
                "resource_type must not be empty".to_string(),
            ));
        }

        let ctx = CallContext::new(request.cancellation.clone(), None);
        let result = self.run(&ctx, &request).await;

        match &result {
            Ok(counts) => {
                log_invalidation(
                    &request.resource_type,
                    &request.tenant_id,
                    &request.resource_id,
                    request.cascade,
                    counts.total,
                    ctx.elapsed().as_millis() as u64,
                );
            }
            Err(e) => {
                error!(
                    component = components::INVALIDATION,
                    resource_type = %request.resource_type,
                    tenant_id = %request.tenant_id,
                    resource_id = %request.resource_id,
                    error = %e,
                    "Cache invalidation failed"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        ctx: &CallContext,
        request: &InvalidationRequest,
    ) -> CacheResult<InvalidationCounts> {
        let mut counts = InvalidationCounts::default();
        let mut visited: HashSet<Target> = HashSet::new();
        let mut frontier = vec![Target::Resource {
            data_type: request.resource_type.clone(),
            resource_id: request.resource_id.clone(),
        }];

        while !frontier.is_empty() {
            let level: Vec<Target> = frontier
                .drain(..)
                .filter(|target| visited.insert(target.clone()))
                .collect();
            if level.is_empty() {
                break;
            }

            let deleted = ctx
                .bounded(
                    Phase::Invalidate,
                    None,
                    try_join_all(
                        level
                            .iter()
                            .map(|target| self.delete_target(&request.tenant_id, target)),
                    ),
                )
                .await?;

            for (target, deleted) in level.iter().zip(deleted) {
                counts.add(target.data_type(), deleted);
                self.store.metrics().record(CacheEvent::Invalidation {
                    resource_type: request.resource_type.clone(),
                    data_type: target.data_type().to_string(),
                    deleted,
                });
            }

            if request.cascade {
                for target in &level {
                    self.expand(ctx, request, target, &mut frontier).await?;
                }
            }
        }

        Ok(counts)
    }

    /// Remove every entry of a tenant, all types included
    pub async fn purge_tenant(&self, tenant_id: &str) -> CacheResult<u64> {
        let pattern = self.keys.tenant_pattern(tenant_id)?;
        let deleted = self.store.delete_pattern(&pattern).await?;
        log_invalidation("tenant", tenant_id, "*", false, deleted, 0);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::distributed::{DistributedStoreProvider, MemoryStore};
    use crate::cache::key::CacheKey;
    use crate::cache::local::LocalStore;
    use crate::cache::ttl::Expiry;
    use crate::metrics::NoOpMetricsSink;

    fn coordinator(store: &MemoryStore) -> InvalidationCoordinator {
        let tiered = TieredStore::new(
            Some(Arc::new(LocalStore::new(100, 0.2, Duration::from_secs(300)))),
            DistributedStoreProvider::in_memory(store.clone(), Duration::from_millis(100), None),
            Arc::new(NoOpMetricsSink),
        );
        InvalidationCoordinator::new(
            KeyBuilder::default(),
            tiered,
            Arc::new(DependencyGraph::platform_default()),
            Duration::from_secs(1),
        )
    }

    async fn seed(coordinator: &InvalidationCoordinator, key: CacheKey) {
        let primary = coordinator.keys.primary_key(&key).unwrap();
        coordinator
            .store
            .set(&primary, b"{}".to_vec(), Expiry::from_secs(60))
            .await
            .unwrap();
    }

    #[test]
    fn test_cycle_rejected() {
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec![DependencyRule::same_resource("b")]);
        edges.insert("b".to_string(), vec![DependencyRule::same_resource("a")]);
        let err = DependencyGraph::new(edges, HashMap::new()).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(msg) if msg.contains("cycle")));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut edges = HashMap::new();
        edges.insert(
            "a".to_string(),
            vec![DependencyRule::same_resource("b"), DependencyRule::same_resource("c")],
        );
        edges.insert("b".to_string(), vec![DependencyRule::same_resource("d")]);
        edges.insert("c".to_string(), vec![DependencyRule::same_resource("d")]);
        assert!(DependencyGraph::new(edges, HashMap::new()).is_ok());
    }

    #[test]
    fn test_default_graph_is_acyclic() {
        let graph = DependencyGraph::platform_default();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.dependents("agent").len(), 4);
        assert_eq!(
            graph.group_by("conversation_message"),
            Some(ContextField::Conversation)
        );
        assert!(graph.dependents("unknown").is_empty());
    }

    #[tokio::test]
    async fn test_invalidating_nothing_returns_zero() {
        let coordinator = coordinator(&MemoryStore::new());
        let counts = coordinator
            .invalidate(InvalidationRequest::new("agent", "t1", "a1"))
            .await
            .unwrap();
        assert_eq!(counts.total, 0);
        assert_eq!(counts.get("agent"), Some(0));
        assert_eq!(counts.by_type.len(), 1);
    }

    #[tokio::test]
    async fn test_removes_every_contextual_variant() {
        let coordinator = coordinator(&MemoryStore::new());
        seed(&coordinator, CacheKey::new("t1", "agent_config", "a1")).await;
        seed(
            &coordinator,
            CacheKey::new("t1", "agent_config", "a1").with_conversation("c1"),
        )
        .await;
        seed(&coordinator, CacheKey::new("t1", "agent_config", "a2")).await;

        let counts = coordinator
            .invalidate(InvalidationRequest::new("agent_config", "t1", "a1"))
            .await
            .unwrap();
        assert_eq!(counts.get("agent_config"), Some(2));
        assert_eq!(counts.total, 2);
    }

    #[tokio::test]
    async fn test_group_dependent_and_conversation_cascade() {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store).with_conversation_lookup(Arc::new(lookup_fn(
            |_tenant, _agent| async { Ok::<_, anyhow::Error>(vec!["c1".to_string(), "c2".to_string()]) },
        )));

        seed(
            &coordinator,
            CacheKey::new("t1", "conversation_message", "m1").with_conversation("c1"),
        )
        .await;
        seed(
            &coordinator,
            CacheKey::new("t1", "conversation_message", "m2").with_conversation("c2"),
        )
        .await;
        seed(&coordinator, CacheKey::new("t1", "conversation_memory", "c1")).await;

        // Plain cascade does not follow the conversation hop
        let counts = coordinator
            .invalidate(InvalidationRequest::new("agent", "t1", "a1").with_cascade())
            .await
            .unwrap();
        assert_eq!(counts.total, 0);
        assert_eq!(counts.get("conversation"), None);

        let counts = coordinator
            .invalidate(InvalidationRequest::new("agent", "t1", "a1").with_conversation_cascade())
            .await
            .unwrap();
        assert_eq!(counts.get("conversation_message"), Some(2));
        assert_eq!(counts.get("conversation_memory"), Some(1));
        assert_eq!(counts.total, 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_cascade_without_lookup_is_configuration_error() {
        let coordinator = coordinator(&MemoryStore::new());
        let err = coordinator
            .invalidate(InvalidationRequest::new("agent", "t1", "a1").with_conversation_cascade())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_purge_tenant_leaves_other_tenants() {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        seed(&coordinator, CacheKey::new("t1", "agent", "a1")).await;
        seed(&coordinator, CacheKey::new("t1", "job_status", "j1")).await;
        seed(&coordinator, CacheKey::new("t2", "agent", "a1")).await;

        assert_eq!(coordinator.purge_tenant("t1").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(coordinator.purge_tenant("").await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        store.set_unavailable(true);

        let err = coordinator
            .invalidate(InvalidationRequest::new("agent", "t1", "a1").with_cascade())
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }
}
