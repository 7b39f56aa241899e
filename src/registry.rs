//! Query spec registry.
//!
//! Static mapping from tracked agent to the search predicates needed to
//! count its pull requests. Adding an agent or a category is a change to
//! this table (or to `[[agents]]` in the config file) only.

use crate::config::AgentEntry;
use crate::models::{AgentSpec, Category};
use std::collections::HashSet;
use thiserror::Error;

/// Registry validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate agent key: {0}")]
    DuplicateAgent(String),

    #[error("Agent {agent} registers category {category} more than once")]
    DuplicateCategory { agent: String, category: Category },

    #[error("Agent {0} has no predicates")]
    NoPredicates(String),
}

/// Branch-prefix agents: PRs come from `<prefix>/...` head branches.
fn branch_agent(key: &str, display_name: &str) -> AgentSpec {
    let base = format!("is:pr+head:{}/", key);
    AgentSpec::new(key, display_name)
        .with(Category::Total, base.clone())
        .with(Category::Ready, format!("{}+-is:draft", base))
        .with(Category::Merged, format!("{}+is:merged", base))
}

/// Bot-author agents: PRs authored by a GitHub App account.
fn bot_agent(key: &str, display_name: &str, author: &str) -> AgentSpec {
    let base = format!("author:{}", author);
    AgentSpec::new(key, display_name)
        .with(Category::Total, base.clone())
        .with(Category::Ready, format!("{}+-is:draft", base))
        .with(Category::Merged, format!("{}+is:merged", base))
}

/// The built-in set of tracked agents, in report order.
pub fn specs() -> Vec<AgentSpec> {
    vec![
        branch_agent("copilot", "Copilot"),
        branch_agent("codex", "Codex"),
        branch_agent("cursor", "Cursor"),
        bot_agent("devin", "Devin", "devin-ai-integration[bot]"),
        bot_agent("codegen", "Codegen", "codegen-sh[bot]"),
    ]
}

/// Built-in specs followed by agents declared in the config file.
pub fn specs_with(extra: &[AgentEntry]) -> Vec<AgentSpec> {
    let mut all = specs();
    all.extend(extra.iter().map(AgentEntry::to_spec));
    all
}

/// Check key uniqueness and per-agent category uniqueness.
///
/// Predicate syntax is not interpreted.
pub fn validate(specs: &[AgentSpec]) -> Result<(), RegistryError> {
    let mut keys = HashSet::new();

    for spec in specs {
        if !keys.insert(spec.key.as_str()) {
            return Err(RegistryError::DuplicateAgent(spec.key.clone()));
        }

        if spec.predicates.is_empty() {
            return Err(RegistryError::NoPredicates(spec.key.clone()));
        }

        let mut categories = HashSet::new();
        for predicate in &spec.predicates {
            if !categories.insert(predicate.category) {
                return Err(RegistryError::DuplicateCategory {
                    agent: spec.key.clone(),
                    category: predicate.category,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_valid() {
        let specs = specs();
        assert_eq!(specs.len(), 5);
        assert!(validate(&specs).is_ok());
        assert_eq!(specs[0].key, "copilot");
        assert_eq!(specs[4].key, "codegen");
    }

    #[test]
    fn test_builtin_queries() {
        let specs = specs();
        let copilot = &specs[0];
        assert_eq!(
            copilot.predicate(Category::Total).unwrap().query,
            "is:pr+head:copilot/"
        );
        assert_eq!(
            copilot.predicate(Category::Ready).unwrap().query,
            "is:pr+head:copilot/+-is:draft"
        );

        let devin = specs.iter().find(|s| s.key == "devin").unwrap();
        assert_eq!(
            devin.predicate(Category::Merged).unwrap().query,
            "author:devin-ai-integration[bot]+is:merged"
        );
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut specs = specs();
        specs.push(branch_agent("codex", "Codex again"));
        assert_eq!(
            validate(&specs),
            Err(RegistryError::DuplicateAgent("codex".to_string()))
        );
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let spec = AgentSpec::new("x", "X")
            .with(Category::Total, "a")
            .with(Category::Total, "b");
        assert!(matches!(
            validate(&[spec]),
            Err(RegistryError::DuplicateCategory { .. })
        ));
    }

    #[test]
    fn test_empty_agent_rejected() {
        let spec = AgentSpec::new("x", "X");
        assert_eq!(
            validate(&[spec]),
            Err(RegistryError::NoPredicates("x".to_string()))
        );
    }

    #[test]
    fn test_extra_agents_appended() {
        let extra = vec![AgentEntry {
            key: "jules".to_string(),
            display_name: "Jules".to_string(),
            total: Some("author:google-labs-jules[bot]".to_string()),
            ready: None,
            merged: Some("author:google-labs-jules[bot]+is:merged".to_string()),
        }];
        let all = specs_with(&extra);
        assert_eq!(all.len(), 6);
        assert_eq!(all[5].key, "jules");
        assert_eq!(all[5].predicates.len(), 2);
    }
}
