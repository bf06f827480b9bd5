use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use crate::measure::MeasuredRun;
use crate::session::StopReason;
use crate::stats::{ListStats, SessionStats};

const BANNER_WIDTH: usize = 80;

/// Top-level `results.json` document.
#[derive(Debug, Serialize)]
pub struct ResultsDoc {
    pub params: ParamsDoc,
    /// Start-to-first-event statistics.
    pub boot: ListStats,
    /// Pooled inter-event delta statistics.
    pub event: ListStats,
}

#[derive(Debug, Serialize)]
pub struct ParamsDoc {
    #[serde(rename = "E")]
    pub energy: f64,
    pub aoi: f64,
    pub cutoff: Option<f64>,
}

impl ResultsDoc {
    pub fn new(energy: f64, aoi: f64, cutoff: Option<f64>, stats: &SessionStats) -> ResultsDoc {
        ResultsDoc {
            params: ParamsDoc {
                energy,
                aoi,
                cutoff,
            },
            boot: stats.first,
            event: stats.event,
        }
    }
}

pub fn write_results(path: &Path, doc: &ResultsDoc) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path, json + "\n").with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// `data.json`: the per-run measurements, in execution order.
pub fn write_data(path: &Path, runs: &[MeasuredRun]) -> Result<()> {
    let json = serde_json::to_string_pretty(runs)?;
    fs::write(path, json + "\n").with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// One-line progress summary printed after each run.
pub fn run_brief(stats: &SessionStats) -> String {
    format!(
        "Stats: dts: {:.2} ({:.2})",
        stats.event.mean, stats.event.stdev
    )
}

/// Closing block with the pooled statistics, colored on a terminal.
pub fn session_summary(stats: &SessionStats, stop: StopReason) -> String {
    let header = match stop {
        StopReason::BudgetSpent => "Session complete",
        StopReason::Interrupted => "Session interrupted",
    };

    let mut out = String::new();
    out.push_str(
        &header
            .if_supports_color(Stream::Stdout, |s| s.bold())
            .to_string(),
    );
    out.push('\n');
    out.push_str(&format!(
        "  boot   {}\n",
        stat_line(&stats.first)
            .if_supports_color(Stream::Stdout, |s| s.green())
            .to_string()
    ));
    out.push_str(&format!(
        "  event  {}\n",
        stat_line(&stats.event)
            .if_supports_color(Stream::Stdout, |s| s.green())
            .to_string()
    ));
    out
}

fn stat_line(stats: &ListStats) -> String {
    format!(
        "n={}  mean={:.4} s  stdev={:.4} s",
        stats.n, stats.mean, stats.stdev
    )
}

/// Banner wrapping the captured output of a failed run.
pub fn failure_banner(output: &str) -> String {
    let mut out = String::new();
    out.push_str(&sidefill(Some("FGAMMA STDOUT"), BANNER_WIDTH));
    out.push('\n');
    out.push_str(output);
    if !output.is_empty() && !output.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&sidefill(None, BANNER_WIDTH));
    out.push('\n');
    out
}

/// Center `label` in a `width`-column rule of `-` characters; no label
/// gives a plain rule.
fn sidefill(label: Option<&str>, width: usize) -> String {
    let Some(label) = label else {
        return "-".repeat(width);
    };
    let space = width.saturating_sub(label.len() + 2);
    let even = space % 2 == 0;
    let side = if even { space / 2 } else { (space - 1) / 2 };
    format!(
        "{} {} {}{}",
        "-".repeat(side),
        label,
        if even { "" } else { " " },
        "-".repeat(side)
    )
}
