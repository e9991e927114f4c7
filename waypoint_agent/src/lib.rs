//! Waypoint agent layer - guided workflows and adaptive suggestions.
//!
//! This crate ties the orchestration core together:
//!
//! - Workflows: phase/step pipelines over external tools, with dependency
//!   batching, a cache-first dispatch policy and partial-failure handling
//! - Session memory: conversation window, completed-task registry and
//!   long-term memory
//! - Roadmap: per-user progress through four ordered pillars
//! - Suggestions: the best next step per category for the current pillar
//!
//! [`Guide`] is the entry point used by a chat or automation surface.
//!
//! # Example
//!
//! ```ignore
//! use waypoint_agent::Guide;
//! use waypoint_agent::workflow::ToolRegistry;
//! use waypoint_runtime::RuntimeConfig;
//!
//! let guide = Guide::in_memory(registry, &RuntimeConfig::default());
//! guide.record_message("c1", Role::User, "Tell me about indoor plants").await?;
//! let suggestions = guide.get_suggestions("u1", "c1").await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use waypoint_core::{
    CacheStore, CoreError, MemoryStore, Pillar, RoadmapProgress, RoadmapStore, Role, SessionStore,
    ToolCache,
};
use waypoint_runtime::{ConfigError, RuntimeConfig};

pub mod cli;
pub mod roadmap;
pub mod session;
pub mod suggest;
pub mod workflow;

pub use roadmap::RoadmapTracker;
pub use session::{Intent, SessionConfig, SessionMemory};
pub use suggest::{Suggestion, SuggestionEngine, SuggestionTemplate, TemplateCategory, TemplateTable};
pub use workflow::{WorkflowDefinition, WorkflowEngine, WorkflowRun};

use suggest::TemplateError;
use workflow::{builtin_workflow, ToolRegistry, WorkflowError, YamlWorkflowError};

/// Progress credited to a pillar when one of its suggestions is completed.
pub const SUGGESTION_PROGRESS: u32 = 20;

/// Error types for agent operations.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// Workflow definition or inputs rejected
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Workflow file could not be loaded
    #[error("Workflow file error: {0}")]
    WorkflowFile(#[from] YamlWorkflowError),

    /// Storage backend failed on a write that must not be lost
    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// No suggestion template has this task key
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The suggestion is done by hand, not by a workflow
    #[error("Task {0} has no workflow")]
    NoWorkflow(String),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// What to offer the user next.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Suggestions {
    /// Current pillar of the user
    pub pillar: Pillar,
    pub intent: Intent,
    pub topics: Vec<String>,
    /// At most one per category
    pub suggestions: Vec<Suggestion>,
    pub overall_progress: f64,
}

/// Facade over the engine, session memory, roadmap and suggestions.
pub struct Guide {
    engine: WorkflowEngine,
    session: SessionMemory,
    roadmap: RoadmapTracker,
    suggestions: SuggestionEngine,
}

impl Guide {
    pub fn new(
        engine: WorkflowEngine,
        session: SessionMemory,
        roadmap: RoadmapTracker,
        suggestions: SuggestionEngine,
    ) -> Self {
        Self {
            engine,
            session,
            roadmap,
            suggestions,
        }
    }

    /// Builds a guide whose session, roadmap and cache share one store.
    ///
    /// # Arguments
    ///
    /// * `store` - Backend implementing every storage trait
    /// * `registry` - Tools available to workflows
    /// * `config` - Runtime configuration
    pub fn from_store<S>(store: Arc<S>, registry: ToolRegistry, config: &RuntimeConfig) -> Self
    where
        S: SessionStore + RoadmapStore + CacheStore + 'static,
    {
        let session_store: Arc<dyn SessionStore> = store.clone();
        let roadmap_store: Arc<dyn RoadmapStore> = store.clone();
        let cache_store: Arc<dyn CacheStore> = store;

        Self::new(
            WorkflowEngine::from_config(registry, cache_store, config),
            SessionMemory::new(session_store, SessionConfig::from(&config.session)),
            RoadmapTracker::new(roadmap_store),
            SuggestionEngine::default(),
        )
    }

    /// Process-local guide backed by a [`MemoryStore`].
    pub fn in_memory(registry: ToolRegistry, config: &RuntimeConfig) -> Self {
        let store = Arc::new(MemoryStore::with_cache_capacity(config.cache.max_entries));
        Self::from_store(store, registry, config)
    }

    /// Durable guide backed by a SQLite file.
    ///
    /// The tool cache table is capped at `config.cache.max_entries`.
    #[cfg(feature = "sqlite")]
    pub fn open_sqlite(
        path: impl AsRef<std::path::Path>,
        registry: ToolRegistry,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let store = Arc::new(
            waypoint_core::SqliteStore::open(path)?.with_cache_capacity(config.cache.max_entries),
        );
        Ok(Self::from_store(store, registry, config))
    }

    /// Replaces the suggestion templates.
    pub fn with_templates(mut self, table: TemplateTable) -> Self {
        self.suggestions = SuggestionEngine::new(table);
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn session(&self) -> &SessionMemory {
        &self.session
    }

    pub fn roadmap(&self) -> &RoadmapTracker {
        &self.roadmap
    }

    pub fn suggestion_engine(&self) -> &SuggestionEngine {
        &self.suggestions
    }

    pub fn cache(&self) -> &ToolCache {
        self.engine.cache()
    }

    /// Runs a workflow without touching user state.
    pub async fn run_workflow(
        &self,
        definition: &WorkflowDefinition,
        inputs: Value,
    ) -> Result<WorkflowRun> {
        Ok(self.engine.run(definition, inputs).await?)
    }

    /// Runs a workflow on behalf of a user.
    ///
    /// When the run is not failed and the definition carries a completion
    /// rule, the rule's task is marked completed and, the first time only,
    /// its pillar is credited.
    pub async fn run_workflow_for(
        &self,
        user_id: &str,
        conversation_id: &str,
        definition: &WorkflowDefinition,
        inputs: Value,
    ) -> Result<WorkflowRun> {
        let run = self.engine.run(definition, inputs).await?;

        if let Some(rule) = definition.completion.as_ref().filter(|_| run.is_usable()) {
            let newly_completed = self
                .session
                .mark_task_completed(user_id, conversation_id, &rule.task_key, &rule.category, rule.pillar)
                .await?;
            if newly_completed {
                self.roadmap
                    .update_progress(user_id, rule.pillar, u32::from(rule.progress), Map::new())
                    .await?;
            }
        }

        Ok(run)
    }

    /// Runs the builtin workflow behind a suggestion.
    ///
    /// The workflow's completion rule marks the suggestion's task completed
    /// and credits its pillar, the first time only, as with
    /// [`run_workflow_for`](Self::run_workflow_for).
    ///
    /// # Returns
    ///
    /// - `Err(AgentError::UnknownTask)` - No template has `task_key`
    /// - `Err(AgentError::NoWorkflow)` - The template names no workflow
    pub async fn run_suggested_workflow(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
        inputs: Value,
    ) -> Result<WorkflowRun> {
        let template = self
            .suggestions
            .table()
            .get(task_key)
            .ok_or_else(|| AgentError::UnknownTask(task_key.to_string()))?;
        let name = template
            .workflow
            .as_deref()
            .ok_or_else(|| AgentError::NoWorkflow(task_key.to_string()))?;

        let definition = builtin_workflow(name)?;
        self.run_workflow_for(user_id, conversation_id, &definition, inputs)
            .await
    }

    /// Suggestions for the user's current pillar.
    pub async fn get_suggestions(&self, user_id: &str, conversation_id: &str) -> Result<Suggestions> {
        let progress = self.roadmap.get_progress(user_id).await?;
        let messages = self.session.get_recent_messages(conversation_id).await;
        let topics = self.session.extract_topics(&messages);
        let intent = session::detect_current_intent(&messages);
        let completed = self
            .session
            .completed_task_keys(user_id, Some(conversation_id))
            .await;

        let suggestions = self.suggestions.suggest(
            progress.current_pillar,
            &completed,
            topics.first().map(String::as_str),
        );
        tracing::debug!(
            user_id,
            pillar = progress.current_pillar.as_str(),
            intent = intent.as_str(),
            count = suggestions.len(),
            "suggestions selected"
        );

        Ok(Suggestions {
            pillar: progress.current_pillar,
            intent,
            topics,
            suggestions,
            overall_progress: progress.overall(),
        })
    }

    /// Credits a pillar after a user-visible action.
    pub async fn record_progress(&self, user_id: &str, pillar: Pillar, amount: u32) -> Result<RoadmapProgress> {
        self.record_progress_with(user_id, pillar, amount, Map::new())
            .await
    }

    /// Credits a pillar and merges metadata into it.
    pub async fn record_progress_with(
        &self,
        user_id: &str,
        pillar: Pillar,
        amount: u32,
        metadata: Map<String, Value>,
    ) -> Result<RoadmapProgress> {
        Ok(self
            .roadmap
            .update_progress(user_id, pillar, amount, metadata)
            .await?)
    }

    pub async fn record_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<()> {
        Ok(self
            .session
            .record_message(conversation_id, role, content)
            .await?)
    }

    /// Marks a suggestion done.
    ///
    /// The template's pillar is credited with [`SUGGESTION_PROGRESS`] the
    /// first time only; repeated calls return the unchanged progress.
    pub async fn complete_suggestion(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> Result<RoadmapProgress> {
        let template = self
            .suggestions
            .table()
            .get(task_key)
            .ok_or_else(|| AgentError::UnknownTask(task_key.to_string()))?;

        let newly_completed = self
            .session
            .mark_task_completed(
                user_id,
                conversation_id,
                task_key,
                template.category.as_str(),
                template.pillar,
            )
            .await?;

        if !newly_completed {
            return Ok(self.roadmap.get_progress(user_id).await?);
        }
        Ok(self
            .roadmap
            .update_progress(user_id, template.pillar, SUGGESTION_PROGRESS, Map::new())
            .await?)
    }
}

impl std::fmt::Debug for Guide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guide")
            .field("engine", &self.engine)
            .field("templates", &self.suggestions.table().len())
            .finish_non_exhaustive()
    }
}
