//! Next-step suggestions.
//!
//! For the user's current pillar, picks the best remaining template in each
//! category. Completed task keys are never suggested again.

pub mod templates;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use waypoint_core::Pillar;

pub use templates::{SuggestionTemplate, TemplateCategory, TemplateError, TemplateTable};

/// Placeholder text used when no topic is known yet.
const DEFAULT_TOPIC: &str = "your topic";

/// A rendered suggestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub task_key: String,
    pub pillar: Pillar,
    pub category: TemplateCategory,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

/// Selects suggestions from a template table.
#[derive(Clone, Debug)]
pub struct SuggestionEngine {
    table: Arc<TemplateTable>,
}

impl SuggestionEngine {
    pub fn new(table: TemplateTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &TemplateTable {
        &self.table
    }

    /// Best template per category for a pillar.
    ///
    /// Within a category, templates whose task key is in `completed` are
    /// excluded and the lowest priority wins; ties go to the template
    /// declared first. Categories with nothing left are omitted, so the
    /// result holds zero to three templates in category order.
    pub fn get_best_templates(
        &self,
        pillar: Pillar,
        completed: &HashSet<String>,
    ) -> Vec<&SuggestionTemplate> {
        TemplateCategory::ALL
            .into_iter()
            .filter_map(|category| {
                self.table
                    .candidates(pillar, category)
                    .filter(|t| !completed.contains(&t.task_key))
                    .min_by_key(|t| t.priority)
            })
            .collect()
    }

    /// Renders the best templates with `topic` filled in.
    pub fn suggest(
        &self,
        pillar: Pillar,
        completed: &HashSet<String>,
        topic: Option<&str>,
    ) -> Vec<Suggestion> {
        let topic = topic.filter(|t| !t.trim().is_empty()).unwrap_or(DEFAULT_TOPIC);
        self.get_best_templates(pillar, completed)
            .into_iter()
            .map(|t| Suggestion {
                task_key: t.task_key.clone(),
                pillar: t.pillar,
                category: t.category,
                title: t.title.replace("{topic}", topic),
                prompt: t.prompt.replace("{topic}", topic),
                workflow: t.workflow.clone(),
            })
            .collect()
    }
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self::new(TemplateTable::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(templates: &[&SuggestionTemplate]) -> Vec<String> {
        templates.iter().map(|t| t.task_key.clone()).collect()
    }

    #[test]
    fn test_one_per_category_by_priority() {
        let engine = SuggestionEngine::default();
        let best = engine.get_best_templates(Pillar::Discovery, &HashSet::new());

        assert_eq!(
            keys(&best),
            [
                "discovery_topic_research",
                "discovery_related_niches",
                "discovery_source_list"
            ]
        );
    }

    #[test]
    fn test_completed_are_excluded() {
        let engine = SuggestionEngine::default();
        let completed: HashSet<String> = ["discovery_topic_research", "discovery_audience_questions"]
            .into_iter()
            .map(String::from)
            .collect();

        let best = engine.get_best_templates(Pillar::Discovery, &completed);
        assert_eq!(best[0].task_key, "discovery_keyword_scan");
        assert!(best.iter().all(|t| !completed.contains(&t.task_key)));
    }

    #[test]
    fn test_exhausted_category_is_omitted() {
        let engine = SuggestionEngine::default();
        let completed: HashSet<String> = engine
            .table()
            .candidates(Pillar::Strategy, TemplateCategory::Adjacent)
            .map(|t| t.task_key.clone())
            .collect();

        let best = engine.get_best_templates(Pillar::Strategy, &completed);
        assert_eq!(best.len(), 2);
        assert!(best.iter().all(|t| t.category != TemplateCategory::Adjacent));
        assert!(best.iter().all(|t| t.pillar == Pillar::Strategy));
    }

    #[test]
    fn test_suggest_renders_topic() {
        let engine = SuggestionEngine::default();
        let with_topic = engine.suggest(Pillar::Discovery, &HashSet::new(), Some("vegan snacks"));
        assert_eq!(with_topic[0].title, "Research vegan snacks in depth");
        assert_eq!(with_topic[0].workflow.as_deref(), Some("topic_research"));

        let without = engine.suggest(Pillar::Discovery, &HashSet::new(), None);
        assert_eq!(without[0].title, "Research your topic in depth");
    }
}
