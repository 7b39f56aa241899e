//! Trend series for chart generation.

use crate::models::{Methodology, Snapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// One chart point: an agent's volume and rate at one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub agent_key: String,
    /// Rate definition of the snapshot this point came from.
    pub methodology: Methodology,
    pub volume: Option<u64>,
    pub rate: Option<f64>,
    pub complete: bool,
}

/// Flatten history into chart points, optionally only the last `window` snapshots.
pub fn trend_points(history: &[Snapshot], window: Option<usize>) -> Vec<TrendPoint> {
    let start = window
        .map(|n| history.len().saturating_sub(n))
        .unwrap_or(0);

    history[start..]
        .iter()
        .flat_map(|snapshot| {
            snapshot.agents.iter().map(move |agent| TrendPoint {
                timestamp: snapshot.run_timestamp,
                agent_key: agent.agent_key.clone(),
                methodology: snapshot.methodology,
                volume: agent.volume(),
                rate: agent.rate.percent(),
                complete: agent.is_complete(),
            })
        })
        .collect()
}

/// Write chart points as CSV with a header row.
pub fn write_trend_csv(points: &[TrendPoint], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create trend file: {}", path.display()))?;

    for point in points {
        writer
            .serialize(point)
            .context("Failed to write trend row")?;
    }
    writer.flush().context("Failed to flush trend file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate;
    use crate::models::{AgentSpec, Category, RawCount};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn snapshot(secs: i64, total: u64, merged: u64) -> Snapshot {
        let spec = AgentSpec::new("copilot", "Copilot");
        Snapshot {
            run_timestamp: Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap(),
            methodology: Methodology::LegacyTotalBased,
            agents: vec![aggregate(
                &spec,
                vec![
                    RawCount::counted(Category::Total, "t", total, false),
                    RawCount::counted(Category::Merged, "m", merged, false),
                ],
                Methodology::LegacyTotalBased,
            )],
        }
    }

    #[test]
    fn test_trend_points_window() {
        let history = vec![snapshot(0, 10, 5), snapshot(60, 20, 5), snapshot(120, 40, 30)];

        let all = trend_points(&history, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].volume, Some(10));
        assert_eq!(all[0].rate, Some(50.0));

        let recent = trend_points(&history, Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].rate, Some(25.0));
        assert_eq!(recent[1].rate, Some(75.0));

        assert_eq!(trend_points(&history, Some(10)).len(), 3);
    }

    #[test]
    fn test_write_trend_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trend.csv");
        let points = trend_points(&[snapshot(0, 4, 1)], None);

        write_trend_csv(&points, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,agent_key,methodology,volume,rate,complete")
        );
        let row = lines.next().unwrap();
        assert!(row.contains("copilot,legacy_total_based,4,25.0,true"));
    }
}
