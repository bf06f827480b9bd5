use serde::Serialize;

use crate::errors::FgtoolsError;
use crate::measure::MeasuredRun;

/// Sample count, mean and population standard deviation of one list.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListStats {
    pub n: usize,
    pub mean: f64,
    pub stdev: f64,
}

impl ListStats {
    /// Population statistics (divisor `n`, not `n - 1`) over `values`.
    /// `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<ListStats> {
        if values.is_empty() {
            return None;
        }
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        Some(ListStats {
            n,
            mean,
            stdev: variance.sqrt(),
        })
    }
}

/// Pooled statistics over every run of a session.
///
/// `first` aggregates the start-to-first-event latencies, one per run;
/// `event` aggregates the inter-event deltas of all runs in one pool.
/// Both are recomputed from scratch, never updated incrementally.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStats {
    pub first: ListStats,
    pub event: ListStats,
}

pub fn session_stats(runs: &[MeasuredRun]) -> Result<SessionStats, FgtoolsError> {
    if runs.is_empty() {
        return Err(FgtoolsError::EmptyMeasurement);
    }

    let firsts: Vec<f64> = runs.iter().map(|run| run.first).collect();
    let deltas: Vec<f64> = runs.iter().flat_map(|run| run.dts.iter().copied()).collect();

    let Some(first) = ListStats::from_values(&firsts) else {
        return Err(FgtoolsError::EmptyMeasurement);
    };
    let event = ListStats::from_values(&deltas).ok_or_else(|| FgtoolsError::InsufficientData {
        detail: "no run produced an inter-event delta".into(),
    })?;

    Ok(SessionStats { first, event })
}
