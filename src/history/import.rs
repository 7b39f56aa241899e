//! Import of the legacy `data.csv` tracker format.
//!
//! Columns are `timestamp` followed by `<agent>_total`, `<agent>_merged`
//! and, in later files, `<agent>_nondraft`. Each row becomes one snapshot
//! appended through the regular history path.

use crate::analysis::aggregate;
use crate::history::store::{HistoryError, HistoryStore};
use crate::models::{AgentSpec, Category, CountOutcome, Methodology, RawCount, Snapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Snapshots parsed from a legacy CSV.
#[derive(Debug)]
pub struct LegacyData {
    pub methodology: Methodology,
    pub snapshots: Vec<Snapshot>,
    /// Rows that could not be parsed.
    pub unreadable_rows: usize,
}

/// Outcome of an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub methodology: Methodology,
    pub imported: usize,
    /// Unreadable rows plus rows not after the current history tail.
    pub skipped: usize,
}

fn column_name(key: &str, category: Category) -> String {
    let suffix = match category {
        Category::Total => "total",
        Category::Ready => "nondraft",
        Category::Merged => "merged",
    };
    format!("{}_{}", key, suffix)
}

/// Parse legacy timestamps (`%Y-%m-%d %H:%M:%S`, UTC).
///
/// Old rows were written with U+2011 non-breaking hyphens.
pub fn parse_legacy_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replace('\u{2011}', "-");
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

/// Parse a legacy CSV into snapshots, one per row.
pub fn parse_legacy_csv<R: Read>(reader: R, specs: &[AgentSpec]) -> Result<LegacyData> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: HashMap<String, usize> = csv
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_string(), idx))
        .collect();

    let timestamp_idx = *headers
        .get("timestamp")
        .context("CSV has no timestamp column")?;

    let methodology = if headers.keys().any(|h| h.ends_with("_nondraft")) {
        Methodology::ReadyBased
    } else {
        Methodology::LegacyTotalBased
    };

    let mut snapshots = Vec::new();
    let mut unreadable_rows = 0;

    for (row_idx, record) in csv.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(row = row_idx + 2, error = %e, "Skipping unreadable CSV row");
                unreadable_rows += 1;
                continue;
            }
        };

        let Some(run_timestamp) = record.get(timestamp_idx).and_then(parse_legacy_timestamp)
        else {
            warn!(row = row_idx + 2, "Skipping CSV row with invalid timestamp");
            unreadable_rows += 1;
            continue;
        };

        let agents = specs
            .iter()
            .filter_map(|spec| {
                let counts: Vec<RawCount> = [Category::Total, Category::Ready, Category::Merged]
                    .into_iter()
                    .filter_map(|category| {
                        let idx = *headers.get(&column_name(&spec.key, category))?;
                        let cell = record.get(idx).unwrap_or("").trim();
                        let outcome = match cell.parse::<u64>() {
                            Ok(value) => CountOutcome::Counted {
                                value,
                                approximate: false,
                            },
                            Err(_) => CountOutcome::Failed {
                                error: format!("missing value in imported row: {:?}", cell),
                            },
                        };
                        Some(RawCount {
                            category,
                            query: spec
                                .predicate(category)
                                .map(|p| p.query.clone())
                                .unwrap_or_default(),
                            retrieved_at: run_timestamp,
                            attempts: 0,
                            outcome,
                        })
                    })
                    .collect();

                // Agents without any column were not tracked yet.
                if counts.is_empty() {
                    None
                } else {
                    Some(aggregate(spec, counts, methodology))
                }
            })
            .collect();

        snapshots.push(Snapshot {
            run_timestamp,
            methodology,
            agents,
        });
    }

    Ok(LegacyData {
        methodology,
        snapshots,
        unreadable_rows,
    })
}

/// Append parsed legacy snapshots to the history.
///
/// Rows at or before the current history tail are skipped.
pub fn import_into(store: &mut HistoryStore, data: LegacyData) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        methodology: data.methodology,
        imported: 0,
        skipped: data.unreadable_rows,
    };

    for snapshot in data.snapshots {
        match store.append(snapshot) {
            Ok(()) => summary.imported += 1,
            Err(HistoryError::NonMonotonic { latest, attempted }) => {
                warn!(%latest, %attempted, "Skipping imported row not after history tail");
                summary.skipped += 1;
            }
            Err(e) => return Err(e).context("Failed to append imported snapshot"),
        }
    }

    Ok(summary)
}

/// Import a legacy CSV file into the history.
pub fn import_legacy_csv(
    path: &Path,
    specs: &[AgentSpec],
    store: &mut HistoryStore,
) -> Result<ImportSummary> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let data = parse_legacy_csv(file, specs)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    import_into(store, data)
}
