use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::errors::FgtoolsError;
use crate::stats::ListStats;

/// Samples collected by [`time_repeated`], with a note when Ctrl-C cut the
/// series short.
#[derive(Debug)]
pub struct TimingOutcome {
    pub samples: Vec<f64>,
    pub interrupted: bool,
}

/// Run `command` under the external timer once and return the user time in
/// seconds.
///
/// The timer is invoked as `<timer> -f%U <command...>`, so it prints the
/// seconds as the last line on stderr. The command's own stdout is
/// discarded; its stderr goes to the same pipe and is skipped by taking
/// the last non-empty line.
pub fn time_once(timer: &Path, command: &[String]) -> Result<f64> {
    let mut cmd = Command::new(timer);
    cmd.arg("-f%U")
        .args(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let output = cmd.output().map_err(|source| FgtoolsError::Spawn {
        program: timer.display().to_string(),
        source,
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(FgtoolsError::ChildProcess {
            program: timer.display().to_string(),
            status: output.status,
            output: stderr.into_owned(),
        }
        .into());
    }

    let last = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| FgtoolsError::MalformedOutput {
            line: String::new(),
            detail: "timer wrote nothing to stderr".into(),
        })?;
    let secs = last
        .trim()
        .parse::<f64>()
        .map_err(|_| FgtoolsError::MalformedOutput {
            line: last.to_string(),
            detail: "expected the utime seconds".into(),
        })?;
    Ok(secs)
}

/// Time `command` up to `runs` times, calling `on_sample` after each run.
///
/// The interrupt flag is polled before every run; a run that fails while
/// the flag is set counts as interrupted rather than as an error.
pub fn time_repeated<F>(
    timer: &Path,
    command: &[String],
    runs: u64,
    interrupt: &AtomicBool,
    mut on_sample: F,
) -> Result<TimingOutcome>
where
    F: FnMut(usize, f64),
{
    let mut samples = Vec::with_capacity(runs as usize);
    let mut interrupted = false;
    for _ in 0..runs {
        if interrupt.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        match time_once(timer, command) {
            Ok(secs) => {
                on_sample(samples.len(), secs);
                samples.push(secs);
            }
            Err(_) if interrupt.load(Ordering::SeqCst) => {
                interrupted = true;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(TimingOutcome {
        samples,
        interrupted,
    })
}

/// Render the closing report, or `None` when there is nothing to report.
pub fn summarize(samples: &[f64]) -> Option<String> {
    let stats = ListStats::from_values(samples)?;
    if stats.n == 1 {
        return Some(format!("Measured once: {}", samples[0]));
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let ratio = stats.stdev / stats.mean;
    Some(format!(
        "Measured {} times.\nMean utime: {:7.2}\nStd. dev:   {:7.2} ({:6.2}%)\nMin, max:   {:7.2}, {:7.2}",
        stats.n,
        stats.mean,
        stats.stdev,
        ratio * 100.0,
        min,
        max
    ))
}
