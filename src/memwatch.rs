use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Background memory sampler for one process.
///
/// A dedicated thread wakes once per interval, refreshes the pid's memory
/// info and appends `elapsed,status,rss,vms` to the log (elapsed in seconds
/// since the process started, rss/vms in bytes). A row is only written when
/// rss or vms changed, and every row is flushed as it is written. The
/// channel is the cancellation token: dropping a message into it (or
/// dropping the sender) wakes and ends the thread.
pub struct MemWatcher {
    cancel: mpsc::Sender<()>,
    handle: JoinHandle<u64>,
}

impl MemWatcher {
    pub fn spawn(pid: u32, log_path: &Path, interval: Duration) -> Result<MemWatcher> {
        let file = File::create(log_path)?;
        let (cancel, tick) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("memwatch".into())
            .spawn(move || sample_loop(pid, file, interval, tick))?;

        Ok(MemWatcher { cancel, handle })
    }

    /// Cancel the sampler and wait for it. Returns the number of rows written.
    pub fn stop(self) -> u64 {
        let _ = self.cancel.send(());
        self.handle.join().unwrap_or(0)
    }
}

fn sample_loop(pid: u32, file: File, interval: Duration, tick: mpsc::Receiver<()>) -> u64 {
    let mut out = BufWriter::new(file);
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    let refresh = ProcessRefreshKind::new().with_memory();

    let started = Instant::now();
    let mut age_at_start: Option<f64> = None;
    let mut last = (u64::MAX, u64::MAX);
    let mut rows = 0u64;

    loop {
        let alive = sys.refresh_process_specifics(sys_pid, refresh);
        let Some(process) = (if alive { sys.process(sys_pid) } else { None }) else {
            log::debug!("pid {} gone after {} samples", pid, rows);
            break;
        };

        let age = age_at_start.get_or_insert_with(|| process_age(process.start_time()));
        let elapsed = *age + started.elapsed().as_secs_f64();
        let rss = process.memory();
        let vms = process.virtual_memory();

        if (rss, vms) != last {
            let write = writeln!(out, "{},{},{},{}", elapsed, process.status(), rss, vms)
                .and_then(|_| out.flush());
            if let Err(err) = write {
                log::warn!("memory log write failed, sampler stopping: {}", err);
                return rows;
            }
            rows += 1;
            last = (rss, vms);
        }

        match tick.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            // Cancelled, or the watcher handle is gone.
            _ => break,
        }
    }

    let _ = out.flush();
    rows
}

/// Seconds between process start and now.
fn process_age(start_time_secs: u64) -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => (now.as_secs_f64() - start_time_secs as f64).max(0.0),
        Err(_) => 0.0,
    }
}
