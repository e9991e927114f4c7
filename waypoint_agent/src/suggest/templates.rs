//! Suggestion templates.
//!
//! A [`TemplateTable`] is immutable once built. The builtin table covers
//! every pillar with at least three templates per category; custom tables
//! load from YAML:
//!
//! ```yaml
//! templates:
//!   - task_key: audience_interviews
//!     pillar: discovery
//!     category: deep_dive
//!     priority: 1
//!     title: Interview readers about {topic}
//!     prompt: Draft five interview questions about {topic}.
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use waypoint_core::Pillar;

/// Kind of next step a suggestion offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// Go deeper on the current topic
    DeepDive,
    /// Explore a neighbouring topic
    Adjacent,
    /// Turn findings into output
    Execution,
}

impl TemplateCategory {
    pub const ALL: [TemplateCategory; 3] = [
        TemplateCategory::DeepDive,
        TemplateCategory::Adjacent,
        TemplateCategory::Execution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateCategory::DeepDive => "deep_dive",
            TemplateCategory::Adjacent => "adjacent",
            TemplateCategory::Execution => "execution",
        }
    }
}

/// One candidate suggestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionTemplate {
    /// Unique key recorded once the suggestion is completed
    pub task_key: String,
    pub pillar: Pillar,
    pub category: TemplateCategory,
    /// Lower runs first
    pub priority: i32,
    /// May contain a `{topic}` placeholder
    pub title: String,
    /// May contain a `{topic}` placeholder
    pub prompt: String,
    /// Name of the builtin workflow that carries the suggestion out, if any
    /// (see [`builtin_workflow`](crate::workflow::builtin_workflow))
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Duplicate template task key: {0}")]
    DuplicateTaskKey(String),

    #[error("Template {0} has an empty title")]
    EmptyTitle(String),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

#[derive(Deserialize)]
struct TableFile {
    templates: Vec<SuggestionTemplate>,
}

type BuiltinRow = (
    &'static str,
    Pillar,
    TemplateCategory,
    i32,
    &'static str,
    &'static str,
    Option<&'static str>,
);

use Pillar::{Discovery, GapAnalysis, Production, Strategy};
use TemplateCategory::{Adjacent, DeepDive, Execution};

#[rustfmt::skip]
const BUILTIN: &[BuiltinRow] = &[
    // Discovery
    ("discovery_topic_research", Discovery, DeepDive, 1,
        "Research {topic} in depth",
        "Collect search results, trends and top pages for {topic}.",
        Some("topic_research")),
    ("discovery_audience_questions", Discovery, DeepDive, 2,
        "Find the questions people ask about {topic}",
        "List the most common audience questions about {topic}.", None),
    ("discovery_keyword_scan", Discovery, DeepDive, 3,
        "Scan keywords around {topic}",
        "Pull search volume and difficulty for keywords related to {topic}.",
        Some("keyword_scan")),
    ("discovery_related_niches", Discovery, Adjacent, 1,
        "Explore niches next to {topic}",
        "Suggest three neighbouring niches to {topic} and why they matter.", None),
    ("discovery_trend_watch", Discovery, Adjacent, 2,
        "Check what is trending near {topic}",
        "Summarise rising trends connected to {topic}.", None),
    ("discovery_community_map", Discovery, Adjacent, 3,
        "Map communities discussing {topic}",
        "Find forums and communities where {topic} is discussed.", None),
    ("discovery_source_list", Discovery, Execution, 1,
        "Build a source list for {topic}",
        "Compile a list of credible sources and citations about {topic}.", None),
    ("discovery_research_brief", Discovery, Execution, 2,
        "Write a research brief on {topic}",
        "Turn what we know about {topic} into a one-page brief.", None),
    ("discovery_idea_bank", Discovery, Execution, 3,
        "Start an idea bank for {topic}",
        "Capture twenty raw content ideas about {topic}.", None),
    // Gap analysis
    ("gap_competitor_audit", GapAnalysis, DeepDive, 1,
        "Audit competitors covering {topic}",
        "Compare the top-ranking pages for {topic} and note what they cover.",
        Some("competitor_audit")),
    ("gap_content_gaps", GapAnalysis, DeepDive, 2,
        "Find content gaps in {topic}",
        "Identify subtopics of {topic} that competitors miss.", None),
    ("gap_serp_features", GapAnalysis, DeepDive, 3,
        "Review search features for {topic}",
        "List snippets, questions and video results shown for {topic}.", None),
    ("gap_underserved_formats", GapAnalysis, Adjacent, 1,
        "Spot underused formats for {topic}",
        "Check which formats (video, tools, guides) are missing for {topic}.", None),
    ("gap_adjacent_keywords", GapAnalysis, Adjacent, 2,
        "Compare adjacent keywords to {topic}",
        "Find lower-competition keywords next to {topic}.", None),
    ("gap_audience_segments", GapAnalysis, Adjacent, 3,
        "Find underserved audiences for {topic}",
        "Identify audience segments not served by existing {topic} content.", None),
    ("gap_opportunity_matrix", GapAnalysis, Execution, 1,
        "Score the opportunities in {topic}",
        "Rank the gaps in {topic} by effort and expected impact.", None),
    ("gap_quick_wins", GapAnalysis, Execution, 2,
        "Pick quick wins for {topic}",
        "Choose three gaps in {topic} we can close this week.", None),
    ("gap_summary_report", GapAnalysis, Execution, 3,
        "Write a gap report for {topic}",
        "Summarise the gap analysis for {topic} in a short report.", None),
    // Strategy
    ("strategy_content_pillars", Strategy, DeepDive, 1,
        "Define content pillars for {topic}",
        "Propose three to five content pillars around {topic}.", None),
    ("strategy_positioning", Strategy, DeepDive, 2,
        "Sharpen positioning on {topic}",
        "Describe how our take on {topic} differs from competitors.", None),
    ("strategy_success_metrics", Strategy, DeepDive, 3,
        "Choose success metrics for {topic}",
        "Pick the metrics that show our {topic} content is working.", None),
    ("strategy_channel_mix", Strategy, Adjacent, 1,
        "Plan channels for {topic}",
        "Decide which channels suit {topic} content best.", None),
    ("strategy_partnerships", Strategy, Adjacent, 2,
        "Look for partners around {topic}",
        "List creators or brands we could collaborate with on {topic}.", None),
    ("strategy_repurposing", Strategy, Adjacent, 3,
        "Plan repurposing for {topic}",
        "Sketch how one {topic} piece becomes five formats.", None),
    ("strategy_content_calendar", Strategy, Execution, 1,
        "Build a content calendar for {topic}",
        "Lay out four weeks of {topic} content.",
        Some("content_calendar")),
    ("strategy_cluster_outline", Strategy, Execution, 2,
        "Outline a topic cluster for {topic}",
        "Outline a pillar page and supporting articles for {topic}.", None),
    ("strategy_launch_plan", Strategy, Execution, 3,
        "Draft a launch plan for {topic}",
        "Plan the first release of {topic} content step by step.", None),
    // Production
    ("production_first_draft", Production, DeepDive, 1,
        "Draft the first {topic} article",
        "Write a first draft of the flagship article on {topic}.",
        Some("article_draft")),
    ("production_expert_quotes", Production, DeepDive, 2,
        "Add expert quotes on {topic}",
        "Find citable expert statements about {topic}.", None),
    ("production_fact_check", Production, DeepDive, 3,
        "Fact-check the {topic} draft",
        "Verify claims and citations in the {topic} draft.", None),
    ("production_social_posts", Production, Adjacent, 1,
        "Write social posts about {topic}",
        "Create five social posts promoting the {topic} piece.", None),
    ("production_newsletter", Production, Adjacent, 2,
        "Turn {topic} into a newsletter",
        "Adapt the {topic} article into a newsletter issue.", None),
    ("production_visuals", Production, Adjacent, 3,
        "Plan visuals for {topic}",
        "Describe images and diagrams that support the {topic} piece.", None),
    ("production_seo_polish", Production, Execution, 1,
        "Polish the {topic} piece for search",
        "Tune headings, meta description and links for {topic}.", None),
    ("production_publish_checklist", Production, Execution, 2,
        "Run the publishing checklist for {topic}",
        "Go through the pre-publish checklist for the {topic} piece.", None),
    ("production_performance_review", Production, Execution, 3,
        "Review how {topic} content performs",
        "Check early performance of the published {topic} content.", None),
];

/// Immutable set of suggestion templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateTable {
    templates: Vec<SuggestionTemplate>,
}

impl TemplateTable {
    /// Validates and wraps a list of templates.
    ///
    /// # Returns
    ///
    /// - `Err(TemplateError::DuplicateTaskKey)` if two templates share a key
    /// - `Err(TemplateError::EmptyTitle)` if a title is blank
    pub fn new(templates: Vec<SuggestionTemplate>) -> Result<Self, TemplateError> {
        let mut seen = HashSet::new();
        for template in &templates {
            if !seen.insert(template.task_key.as_str()) {
                return Err(TemplateError::DuplicateTaskKey(template.task_key.clone()));
            }
            if template.title.trim().is_empty() {
                return Err(TemplateError::EmptyTitle(template.task_key.clone()));
            }
        }
        Ok(Self { templates })
    }

    /// The table shipped with the crate.
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(
                |&(task_key, pillar, category, priority, title, prompt, workflow)| SuggestionTemplate {
                    task_key: task_key.to_string(),
                    pillar,
                    category,
                    priority,
                    title: title.to_string(),
                    prompt: prompt.to_string(),
                    workflow: workflow.map(str::to_string),
                },
            )
            .collect();
        Self { templates }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, TemplateError> {
        let file: TableFile = serde_yaml::from_str(yaml)?;
        Self::new(file.templates)
    }

    pub fn templates(&self) -> &[SuggestionTemplate] {
        &self.templates
    }

    pub fn get(&self, task_key: &str) -> Option<&SuggestionTemplate> {
        self.templates.iter().find(|t| t.task_key == task_key)
    }

    /// Templates of one pillar and category, in declaration order.
    pub fn candidates(
        &self,
        pillar: Pillar,
        category: TemplateCategory,
    ) -> impl Iterator<Item = &SuggestionTemplate> {
        self.templates
            .iter()
            .filter(move |t| t.pillar == pillar && t.category == category)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::builtin()
    }
}
