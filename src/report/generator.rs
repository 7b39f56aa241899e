//! Markdown report generation.
//!
//! This module renders the latest snapshot as a Markdown document or
//! JSON. It only formats; every figure comes from the snapshot.

use crate::analysis::{rank_by_rate, SnapshotSummary};
use crate::models::{AgentMetrics, Category, CountOutcome, MergeRate, Snapshot, UndefinedReason};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(snapshot: &Snapshot) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# AI Coding Agent PR Stats\n\n");

    output.push_str(&generate_metadata_section(snapshot));
    output.push_str(&generate_stats_table(snapshot));
    output.push_str(&generate_ranking_section(snapshot));
    output.push_str(&generate_notes_section(snapshot));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(snapshot: &Snapshot) -> String {
    let mut section = String::new();
    let summary = SnapshotSummary::from_snapshot(snapshot);

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Updated:** {}\n",
        snapshot.run_timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Methodology:** `{}` ({})\n",
        snapshot.methodology,
        snapshot.methodology.describe()
    ));
    section.push_str(&format!("- **Agents Tracked:** {}\n", summary.agents));
    if summary.incomplete > 0 {
        section.push_str(&format!("- **Incomplete Agents:** {}\n", summary.incomplete));
    }
    section.push('\n');

    section
}

fn format_count(agent: &AgentMetrics, category: Category) -> String {
    match agent.count(category).map(|c| &c.outcome) {
        Some(CountOutcome::Counted {
            value,
            approximate: true,
        }) => format!("~{}", value),
        Some(CountOutcome::Counted { value, .. }) => value.to_string(),
        Some(CountOutcome::Failed { .. }) => "error".to_string(),
        None => "-".to_string(),
    }
}

fn format_rate(rate: &MergeRate) -> String {
    match rate {
        MergeRate::Percent { value } => format!("{:.2}%", value),
        MergeRate::Undefined {
            reason: UndefinedReason::ZeroDenominator,
        } => "n/a (no PRs)".to_string(),
        MergeRate::Undefined { .. } => "n/a".to_string(),
    }
}

fn status_label(agent: &AgentMetrics) -> &'static str {
    if !agent.has_data() {
        "⚪ no data"
    } else if agent.is_complete() {
        "🟢 complete"
    } else {
        "🟡 partial"
    }
}

/// Generate the per-agent statistics table.
fn generate_stats_table(snapshot: &Snapshot) -> String {
    let mut section = String::new();

    section.push_str("## Current Statistics\n\n");
    section.push_str("| Agent | Total | Ready | Merged | Merge Rate | Status |\n");
    section.push_str("|:---|---:|---:|---:|---:|:---|\n");

    for agent in &snapshot.agents {
        let mut rate = format_rate(&agent.rate);
        if agent.approximate {
            rate.push_str(" *");
        }
        if agent.inconsistent {
            rate.push_str(" ⚠️");
        }

        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            agent.display_name,
            format_count(agent, Category::Total),
            format_count(agent, Category::Ready),
            format_count(agent, Category::Merged),
            rate,
            status_label(agent),
        ));
    }
    section.push('\n');

    section
}

/// Generate the ranking by merge rate.
fn generate_ranking_section(snapshot: &Snapshot) -> String {
    let ranked: Vec<_> = rank_by_rate(snapshot)
        .into_iter()
        .filter_map(|a| a.rate.percent().map(|rate| (a, rate)))
        .collect();

    if ranked.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Ranking\n\n");
    for (i, (agent, rate)) in ranked.iter().enumerate() {
        section.push_str(&format!("{}. **{}** - {:.2}%\n", i + 1, agent.display_name, rate));
    }
    section.push('\n');

    section
}

/// Generate notes on approximate, inconsistent and failed counts.
fn generate_notes_section(snapshot: &Snapshot) -> String {
    let mut notes = Vec::new();

    for agent in &snapshot.agents {
        for count in &agent.counts {
            if let CountOutcome::Failed { ref error } = count.outcome {
                notes.push(format!(
                    "{} `{}` count failed after {} attempt(s): {}",
                    agent.display_name, count.category, count.attempts, error
                ));
            }
        }
        if agent.approximate {
            notes.push(format!(
                "{} has approximate counts (marked `~`; rate marked `*`).",
                agent.display_name
            ));
        }
        if agent.inconsistent {
            notes.push(format!(
                "{} reports more merged PRs than its denominator.",
                agent.display_name
            ));
        }
    }

    if notes.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Notes\n\n");
    for note in notes {
        section.push_str(&format!("- {}\n", note));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Generated by PR Watcher*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(snapshot: &Snapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate;
    use crate::models::{AgentSpec, Methodology, RawCount};
    use chrono::Utc;

    fn create_test_snapshot() -> Snapshot {
        let methodology = Methodology::ReadyBased;
        Snapshot {
            run_timestamp: Utc::now(),
            methodology,
            agents: vec![
                aggregate(
                    &AgentSpec::new("copilot", "Copilot"),
                    vec![
                        RawCount::counted(Category::Total, "t", 300, false),
                        RawCount::counted(Category::Ready, "r", 200, true),
                        RawCount::counted(Category::Merged, "m", 150, false),
                    ],
                    methodology,
                ),
                aggregate(
                    &AgentSpec::new("codex", "Codex"),
                    vec![
                        RawCount::counted(Category::Total, "t", 0, false),
                        RawCount::counted(Category::Ready, "r", 0, false),
                        RawCount::counted(Category::Merged, "m", 0, false),
                    ],
                    methodology,
                ),
                aggregate(
                    &AgentSpec::new("devin", "Devin"),
                    vec![
                        RawCount::failed(Category::Total, "t", "Request timed out"),
                        RawCount::failed(Category::Ready, "r", "Request timed out"),
                        RawCount::failed(Category::Merged, "m", "Request timed out"),
                    ],
                    methodology,
                ),
            ],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let snapshot = create_test_snapshot();
        let markdown = generate_markdown_report(&snapshot);

        assert!(markdown.contains("# AI Coding Agent PR Stats"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("ready_based"));
        assert!(markdown.contains("| Copilot | 300 | ~200 | 150 | 75.00% * | 🟢 complete |"));
        assert!(markdown.contains("| Codex | 0 | 0 | 0 | n/a (no PRs) | 🟢 complete |"));
        assert!(markdown.contains("| Devin | error | error | error | n/a | ⚪ no data |"));
        assert!(markdown.contains("## Notes"));
        assert!(markdown.contains("Request timed out"));
    }

    #[test]
    fn test_ranking_skips_undefined_rates() {
        let section = generate_ranking_section(&create_test_snapshot());
        assert!(section.contains("1. **Copilot** - 75.00%"));
        assert!(!section.contains("Codex"));
    }

    #[test]
    fn test_metadata_lists_incomplete_agents() {
        let section = generate_metadata_section(&create_test_snapshot());
        assert!(section.contains("Incomplete Agents:** 1"));
    }

    #[test]
    fn test_generate_json_report() {
        let snapshot = create_test_snapshot();
        let json = generate_json_report(&snapshot).unwrap();

        assert!(json.contains("\"run_timestamp\""));
        assert!(json.contains("\"methodology\": \"ready_based\""));
        assert!(json.contains("\"completeness\": \"incomplete\""));
    }
}
