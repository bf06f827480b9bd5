use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;

use crate::command::SimCommand;
use crate::errors::FgtoolsError;
use crate::measure::{self, MeasuredRun};
use crate::stats::{SessionStats, session_stats};

/// Why a session stopped adding runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The controller decided the remaining budget is not worth another run.
    BudgetSpent,
    /// Ctrl-C, either between runs or while one was executing.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The invocation of the first run; its event count is the starting
    /// point for the controller.
    pub command: SimCommand,
    /// Wall-clock budget for the whole session, in seconds.
    pub target_seconds: f64,
}

/// One benchmarking session: a growing list of measured runs plus the clock
/// they are scheduled against.
pub struct Session {
    config: SessionConfig,
    started: Instant,
    runs: Vec<MeasuredRun>,
}

/// Event count for the next run, or `None` when fewer than three more
/// events would fit the remaining time.
///
/// `next = round((time_left - first.mean) / event.mean)`, clamped to
/// `max(round((target - first.mean) / (10 * event.mean)), 10)` so one run
/// covers at most about a tenth of the full budget.
pub fn plan_next_count(
    target_seconds: f64,
    time_left: f64,
    stats: &SessionStats,
) -> Result<Option<u64>, FgtoolsError> {
    let ev_mean = stats.event.mean;
    if !ev_mean.is_finite() || ev_mean <= 0.0 {
        return Err(FgtoolsError::InsufficientData {
            detail: format!("mean inter-event delta {} cannot schedule a run", ev_mean),
        });
    }

    let max_next = (((target_seconds - stats.first.mean) / (10.0 * ev_mean)).round() as i64).max(10);
    let next = ((time_left - stats.first.mean) / ev_mean).round() as i64;

    if next < 3 {
        return Ok(None);
    }
    Ok(Some(next.min(max_next) as u64))
}

impl Session {
    pub fn new(config: SessionConfig) -> Session {
        Session {
            config,
            started: Instant::now(),
            runs: Vec::new(),
        }
    }

    /// Runs recorded so far, in execution order. Failed runs never appear.
    pub fn runs(&self) -> &[MeasuredRun] {
        &self.runs
    }

    pub fn stats(&self) -> Result<SessionStats, FgtoolsError> {
        session_stats(&self.runs)
    }

    /// Seconds since the session was created.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Run the simulator until the budget is spent or `interrupt` is raised.
    ///
    /// Every raw child line goes to `sink` (with a separator line between
    /// runs); `on_run` fires with the pooled statistics after each completed
    /// run. A failed run aborts the session, leaving the previous runs
    /// readable through [`Session::runs`].
    pub fn run<S, O>(&mut self, mut sink: S, mut on_run: O, interrupt: &AtomicBool) -> Result<StopReason>
    where
        S: FnMut(&str),
        O: FnMut(&SessionStats),
    {
        let mut command = self.config.command.clone();

        loop {
            if !self.runs.is_empty() {
                sink(measure::RUN_SEPARATOR);
            }
            println!("Measure: {}", command);

            match measure::measure(&command, &mut sink) {
                Ok(run) => self.runs.push(run),
                Err(err) => {
                    // Ctrl-C reaches the child first and shows up as a
                    // failed run; report the interrupt, not the exit.
                    if interrupt.load(Ordering::SeqCst) {
                        return Ok(StopReason::Interrupted);
                    }
                    return Err(err);
                }
            }

            let stats = session_stats(&self.runs)?;
            on_run(&stats);

            if interrupt.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }

            let time_left = self.config.target_seconds - self.elapsed();
            match plan_next_count(self.config.target_seconds, time_left, &stats)? {
                Some(next) => {
                    log::debug!("planning next run with {} events", next);
                    command = command.with_events(next);
                }
                None => return Ok(StopReason::BudgetSpent),
            }
        }
    }
}
