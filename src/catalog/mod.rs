//! Workflow catalog: named task-graph templates and request classification.
//!
//! Templates are declared in configuration and validated exactly once when
//! the catalog is built; runtime code can assume every template it gets from
//! here is acyclic with fully-resolved dependency references.

use crate::types::{AppError, Result, WorkflowSummary, WorkflowTemplate};
use crate::utils::config::MaestroConfig;
use std::collections::{HashMap, HashSet, VecDeque};

/// Pluggable intent classification: map free-form request text to a workflow
/// template id. No NLU is assumed; the default implementation is keyword
/// matching.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, request_text: &str) -> Option<String>;
}

/// Default classifier: matches configured template keywords against the
/// request text (word match first, then substring), falling back to the
/// configured default workflow. Templates are scanned in id order so the
/// outcome is deterministic.
pub struct KeywordClassifier {
    /// (keyword lowercase, template id) pairs in template-id order.
    keywords: Vec<(String, String)>,
    default_workflow: Option<String>,
}

impl KeywordClassifier {
    pub fn new(templates: &[WorkflowTemplate], default_workflow: Option<String>) -> Self {
        let mut keywords = Vec::new();
        for template in templates {
            for keyword in &template.keywords {
                keywords.push((keyword.to_lowercase(), template.id.clone()));
            }
        }
        Self {
            keywords,
            default_workflow,
        }
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, request_text: &str) -> Option<String> {
        let text = request_text.trim().to_lowercase();

        // Word-boundary matches win over substring matches.
        let words: HashSet<&str> = text
            .split(|c: char| c.is_whitespace() || matches!(c, ':' | ',' | '.' | ';' | '!' | '?'))
            .filter(|w| !w.is_empty())
            .collect();
        for (keyword, template) in &self.keywords {
            if words.contains(keyword.as_str()) {
                return Some(template.clone());
            }
        }

        for (keyword, template) in &self.keywords {
            if text.contains(keyword.as_str()) {
                return Some(template.clone());
            }
        }

        self.default_workflow.clone()
    }
}

/// Holds validated workflow templates and answers lookup/classification
/// queries.
pub struct WorkflowCatalog {
    templates: Vec<WorkflowTemplate>,
    by_id: HashMap<String, usize>,
    classifier: Box<dyn IntentClassifier>,
}

impl std::fmt::Debug for WorkflowCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCatalog")
            .field("templates", &self.templates)
            .field("by_id", &self.by_id)
            .field("classifier", &"<dyn IntentClassifier>")
            .finish()
    }
}

impl WorkflowCatalog {
    /// Build the catalog from configuration, validating every template.
    /// Fails fast at startup on a cyclic or dangling dependency graph.
    pub fn from_config(config: &MaestroConfig) -> Result<Self> {
        let mut templates: Vec<WorkflowTemplate> = config
            .workflows
            .iter()
            .map(|(id, entry)| WorkflowTemplate {
                id: id.clone(),
                description: entry.description.clone(),
                keywords: entry.keywords.clone(),
                subtasks: entry.subtasks.clone(),
            })
            .collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(default) = &config.orchestrator.default_workflow {
            if !templates.iter().any(|t| &t.id == default) {
                return Err(AppError::Configuration(format!(
                    "Default workflow '{}' is not declared",
                    default
                )));
            }
        }

        for template in &templates {
            validate(template)?;
        }

        let classifier = KeywordClassifier::new(
            &templates,
            config.orchestrator.default_workflow.clone(),
        );
        Ok(Self::with_classifier(templates, Box::new(classifier)))
    }

    /// Build a catalog with a custom classifier implementation. Templates
    /// must already be validated via [`validate`].
    pub fn with_classifier(
        templates: Vec<WorkflowTemplate>,
        classifier: Box<dyn IntentClassifier>,
    ) -> Self {
        let by_id = templates
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self {
            templates,
            by_id,
            classifier,
        }
    }

    pub fn get(&self, id: &str) -> Result<&WorkflowTemplate> {
        self.by_id
            .get(id)
            .map(|&i| &self.templates[i])
            .ok_or_else(|| AppError::UnknownWorkflow(format!("Workflow '{}' not found", id)))
    }

    /// Resolve the template for a request: an explicit hint wins, otherwise
    /// the classifier decides.
    pub fn resolve(&self, hint: Option<&str>, request_text: &str) -> Result<&WorkflowTemplate> {
        if let Some(id) = hint {
            return self.get(id);
        }

        let id = self.classifier.classify(request_text).ok_or_else(|| {
            AppError::NoMatchingWorkflow(format!(
                "No workflow template applies to request '{}'",
                truncate(request_text, 80)
            ))
        })?;
        self.get(&id)
    }

    pub fn summaries(&self) -> Vec<WorkflowSummary> {
        self.templates
            .iter()
            .map(|t| {
                let mut capabilities = Vec::new();
                for subtask in &t.subtasks {
                    if !capabilities.contains(&subtask.capability) {
                        capabilities.push(subtask.capability.clone());
                    }
                }
                WorkflowSummary {
                    id: t.id.clone(),
                    description: t.description.clone(),
                    subtask_count: t.subtasks.len(),
                    capabilities,
                }
            })
            .collect()
    }
}

/// Validate a template's dependency graph: unique keys, no dangling
/// references, no cycles. This is the single enforcement point; nothing
/// re-checks acyclicity at runtime.
pub fn validate(template: &WorkflowTemplate) -> Result<()> {
    if template.subtasks.is_empty() {
        return Err(AppError::Configuration(format!(
            "Workflow '{}' declares no subtasks",
            template.id
        )));
    }

    let mut keys = HashSet::new();
    for subtask in &template.subtasks {
        if !keys.insert(subtask.key.as_str()) {
            return Err(AppError::Configuration(format!(
                "Workflow '{}' declares duplicate subtask key '{}'",
                template.id, subtask.key
            )));
        }
    }

    for subtask in &template.subtasks {
        for dep in &subtask.depends_on {
            if !keys.contains(dep.as_str()) {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}' subtask '{}' depends on unknown subtask '{}'",
                    template.id, subtask.key, dep
                )));
            }
        }
    }

    // Kahn's algorithm; whatever survives with a nonzero in-degree sits on a
    // cycle.
    let mut in_degree: HashMap<&str, usize> = template
        .subtasks
        .iter()
        .map(|s| (s.key.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for subtask in &template.subtasks {
        for dep in &subtask.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(subtask.key.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&k, _)| k)
        .collect();
    let mut visited = 0;
    while let Some(key) = queue.pop_front() {
        visited += 1;
        for &dependent in dependents.get(key).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if visited != template.subtasks.len() {
        let mut cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(&k, _)| k)
            .collect();
        cyclic.sort_unstable();
        return Err(AppError::CycleDetected(format!(
            "Workflow '{}' has a dependency cycle involving: {}",
            template.id,
            cyclic.join(", ")
        )));
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
