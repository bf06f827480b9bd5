use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::Stdio;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use serde::Serialize;

use crate::command::SimCommand;
use crate::errors::FgtoolsError;

const EVENT_PREFIX: &str = "% event ";
const DONE_PREFIX: &str = "% done";

/// Divider written into the audit stream between runs.
pub const RUN_SEPARATOR: &str =
    "++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++";

/// Timing of one simulator run, derived from its progress timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct MeasuredRun {
    /// Deltas between consecutive timestamps, in seconds.
    pub dts: Vec<f64>,
    /// Process start to first event, in seconds.
    pub first: f64,
    /// Process start to completion, in seconds.
    pub total: f64,
}

impl MeasuredRun {
    pub fn from_timestamps(ts: &[f64]) -> Result<MeasuredRun, FgtoolsError> {
        let Some(&first) = ts.first() else {
            return Err(FgtoolsError::InsufficientData {
                detail: "run produced no progress timestamps".into(),
            });
        };
        let dts: Vec<f64> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        if dts.iter().any(|&dt| dt < 0.0) {
            return Err(FgtoolsError::InsufficientData {
                detail: "progress timestamps decrease".into(),
            });
        }
        Ok(MeasuredRun {
            dts,
            first,
            total: ts[ts.len() - 1],
        })
    }
}

/// Wall-clock timestamp of a progress line, if the line is one.
///
/// The simulator prints `% event <id> <utime> <stime> <wall>` per event and
/// `% done <utime> <stime> <wall>` once at the end; the wall-clock value sits
/// in whitespace-separated field 5 resp. 4. Non-marker lines yield
/// `Ok(None)`; a marker line whose field is missing or not a number is an
/// error, never silently skipped.
pub fn parse_progress_line(line: &str) -> Result<Option<f64>, FgtoolsError> {
    let field = if line.starts_with(EVENT_PREFIX) {
        5
    } else if line.starts_with(DONE_PREFIX) {
        4
    } else {
        return Ok(None);
    };

    let token =
        line.split_whitespace()
            .nth(field)
            .ok_or_else(|| FgtoolsError::MalformedOutput {
                line: line.to_string(),
                detail: format!("expected a timestamp in field {}", field),
            })?;

    let ts = token
        .parse::<f64>()
        .map_err(|_| FgtoolsError::MalformedOutput {
            line: line.to_string(),
            detail: format!("field {} is not a number: {:?}", field, token),
        })?;

    Ok(Some(ts))
}

/// Run one simulator invocation to completion.
///
/// stdout and stderr are drained as lines arrive and merged in arrival
/// order; every raw line is handed to `sink` before being parsed. A
/// non-zero exit fails the run with everything the child printed; marker
/// lines that cannot be parsed fail it once the child has been reaped.
pub fn measure<F>(command: &SimCommand, mut sink: F) -> Result<MeasuredRun>
where
    F: FnMut(&str),
{
    let mut child = command
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| FgtoolsError::Spawn {
            program: command.executable.display().to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stderr was not captured"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let out_thread = drain_lines(stdout, tx.clone());
    let err_thread = drain_lines(stderr, tx);

    let mut timestamps = Vec::new();
    let mut captured = String::new();
    let mut parse_failure: Option<FgtoolsError> = None;

    // The channel closes once both reader threads finish, which also means
    // the child has closed its pipes.
    for line in rx {
        sink(&line);
        captured.push_str(&line);
        captured.push('\n');

        if parse_failure.is_none() {
            match parse_progress_line(&line) {
                Ok(Some(ts)) => timestamps.push(ts),
                Ok(None) => {}
                Err(err) => parse_failure = Some(err),
            }
        }
    }

    let _ = out_thread.join();
    let _ = err_thread.join();
    let status = child.wait()?;

    if !status.success() {
        return Err(FgtoolsError::ChildProcess {
            program: command.executable.display().to_string(),
            status,
            output: captured,
        }
        .into());
    }
    if let Some(err) = parse_failure {
        return Err(err.into());
    }

    Ok(MeasuredRun::from_timestamps(&timestamps)?)
}

/// Forward `reader` line by line into `tx`; a closed channel or read error
/// ends the thread.
fn drain_lines<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

/// Line-oriented capture of everything the simulator prints, one session per
/// file. Write failures are logged, never propagated.
pub struct AuditLog {
    file: File,
}

impl AuditLog {
    pub fn create(path: &Path) -> std::io::Result<AuditLog> {
        Ok(AuditLog {
            file: File::create(path)?,
        })
    }

    pub fn record_line(&mut self, line: &str) {
        if let Err(err) = writeln!(self.file, "{}", line) {
            log::warn!("audit log write failed: {}", err);
        }
    }
}
