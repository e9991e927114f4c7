//! Builtin workflow definitions.
//!
//! Suggestion templates refer to these by name (see
//! [`SuggestionTemplate::workflow`](crate::suggest::SuggestionTemplate)).
//! Each definition calls tools by name only; the caller registers tools
//! with those names in its [`ToolRegistry`](crate::workflow::ToolRegistry).
//!
//! | Workflow | Tools | Credits |
//! |---|---|---|
//! | `topic_research` | `web_search`, `keyword_trends`, `scrape_page` | `discovery_topic_research` |
//! | `keyword_scan` | `keyword_suggestions`, `keyword_metrics` | `discovery_keyword_scan` |
//! | `competitor_audit` | `web_search`, `scrape_page`, `summarize` | `gap_competitor_audit` |
//! | `content_calendar` | `keyword_suggestions`, `plan_calendar` | `strategy_content_calendar` |
//! | `article_draft` | `web_search`, `outline`, `draft_article` | `production_first_draft` |
//!
//! All of them read a single `topic` input.

use waypoint_core::Pillar;

use crate::workflow::builder::WorkflowBuilder;
use crate::workflow::definition::{CompletionRule, ParamValue, WorkflowDefinition};
use crate::workflow::WorkflowError;
use crate::SUGGESTION_PROGRESS;

/// Names of every builtin workflow.
pub const BUILTIN_WORKFLOWS: &[&str] = &[
    "topic_research",
    "keyword_scan",
    "competitor_audit",
    "content_calendar",
    "article_draft",
];

/// Looks up a builtin workflow by name.
///
/// # Returns
///
/// - `Ok(WorkflowDefinition)` - The named definition
/// - `Err(WorkflowError::UnknownWorkflow)` - If no builtin has that name
pub fn builtin_workflow(name: &str) -> Result<WorkflowDefinition, WorkflowError> {
    match name {
        "topic_research" => topic_research(),
        "keyword_scan" => keyword_scan(),
        "competitor_audit" => competitor_audit(),
        "content_calendar" => content_calendar(),
        "article_draft" => article_draft(),
        other => Err(WorkflowError::UnknownWorkflow(other.to_string())),
    }
}

fn credit(task_key: &str, pillar: Pillar) -> CompletionRule {
    CompletionRule {
        task_key: task_key.to_string(),
        category: "workflow".to_string(),
        pillar,
        progress: SUGGESTION_PROGRESS as u8,
    }
}

fn topic() -> ParamValue {
    ParamValue::input("topic")
}

/// Search, trend lookup, then a scrape of the top result.
pub fn topic_research() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("topic_research")
        .description("Collect search results, trends and the top page for a topic")
        .phase("collect")
        .step("search", "web_search")
        .param("query", topic())
        .step("trends", "keyword_trends")
        .param("keyword", topic())
        .phase("enrich")
        .step("top_page", "scrape_page")
        .param("url", ParamValue::output("search", "results.0.url"))
        .completion(credit("discovery_topic_research", Pillar::Discovery))
        .build()
}

pub fn keyword_scan() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("keyword_scan")
        .description("Expand a topic into keywords and fetch their metrics")
        .phase("scan")
        .step("expand", "keyword_suggestions")
        .param("seed", topic())
        .step("metrics", "keyword_metrics")
        .param("keywords", ParamValue::output("expand", "keywords"))
        .completion(credit("discovery_keyword_scan", Pillar::Discovery))
        .build()
}

/// Scrapes the two best-ranked pages in parallel and summarises both.
pub fn competitor_audit() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("competitor_audit")
        .description("Compare the top-ranking pages for a topic")
        .phase("find")
        .step("search", "web_search")
        .param("query", topic())
        .phase("read")
        .step("first", "scrape_page")
        .param("url", ParamValue::output("search", "results.0.url"))
        .step("second", "scrape_page")
        .param("url", ParamValue::output("search", "results.1.url"))
        .phase("compare")
        .step("summary", "summarize")
        .param(
            "text",
            ParamValue::template("{{first.text}}\n\n---\n\n{{second.text}}"),
        )
        .param("focus", ParamValue::template("coverage of {{input.topic}}"))
        .completion(credit("gap_competitor_audit", Pillar::GapAnalysis))
        .build()
}

pub fn content_calendar() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("content_calendar")
        .description("Lay out four weeks of content for a topic")
        .phase("plan")
        .step("ideas", "keyword_suggestions")
        .param("seed", topic())
        .step("calendar", "plan_calendar")
        .param("topics", ParamValue::output("ideas", "keywords"))
        .param("weeks", ParamValue::literal(4))
        .completion(credit("strategy_content_calendar", Pillar::Strategy))
        .build()
}

/// Research, outline, then draft; each step is ordered after the last.
pub fn article_draft() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("article_draft")
        .description("Write a first draft of the flagship article on a topic")
        .phase("write")
        .step("research", "web_search")
        .param("query", topic())
        .sequential_step("outline", "outline")
        .param("topic", topic())
        .param("sources", ParamValue::output("research", "results"))
        .sequential_step("draft", "draft_article")
        .param("outline", ParamValue::output("outline", ""))
        .completion(credit("production_first_draft", Pillar::Production))
        .build()
}
