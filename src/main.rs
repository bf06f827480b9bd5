use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{self, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use fgtools::command::SimCommand;
use fgtools::errors::FgtoolsError;
use fgtools::measure::AuditLog;
use fgtools::memwatch::MemWatcher;
use fgtools::report::{self, ResultsDoc};
use fgtools::session::{Session, SessionConfig};
use fgtools::solar;
use fgtools::timing;

#[derive(Parser)]
#[command(
    name = "fgtools",
    version,
    about = "Measurement and model-prep utilities for the fgamma simulator"
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run fgamma repeatedly until a time budget is spent
    Measure(MeasureArgs),
    /// Run fgamma once and log its memory use
    Memwatch(MemwatchArgs),
    /// Convert a solar composition table to the YAML model
    Convert(ConvertArgs),
    /// Time a command with an external timer
    Time(TimeArgs),
}

#[derive(Args)]
struct MeasureArgs {
    /// Photon energy
    energy: f64,

    /// Angle of incidence
    aoi: f64,

    /// Cutoff value, forwarded as --cutoff=<CUTOFF>
    #[arg(short, long)]
    cutoff: Option<f64>,

    /// Model file, forwarded as --model=<MODEL>
    #[arg(short, long)]
    model: Option<String>,

    /// Extra argument passed through to the simulator, repeatable
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Number of events on the first run
    #[arg(short = 'n', long, default_value_t = 3)]
    events: u64,

    /// Time budget in seconds
    #[arg(short, long, default_value_t = 120.0)]
    target: f64,

    /// Simulator executable
    #[arg(long = "exec", default_value = "./fgamma")]
    executable: PathBuf,

    /// Directory receiving results.json, data.json and fgamma.stdout.txt
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct MemwatchArgs {
    /// Photon energy
    energy: f64,

    /// Angle of incidence
    aoi: f64,

    /// Number of events
    #[arg(short = 'n', long, default_value_t = 3)]
    events: u64,

    /// Extra argument passed through to the simulator, repeatable
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Simulator executable
    #[arg(long = "exec", default_value = "./fgamma")]
    executable: PathBuf,

    /// Directory receiving memlog.csv and fgamma.stdout.txt
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Sampling interval in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,
}

#[derive(Args)]
struct ConvertArgs {
    /// Composition table to read
    #[arg(default_value = "sun_composition.dat")]
    input: PathBuf,

    /// YAML model to write
    #[arg(default_value = "solarmodel.yml")]
    output: PathBuf,
}

#[derive(Args)]
struct TimeArgs {
    /// Number of timed runs
    #[arg(short = 'n', long, default_value_t = 3)]
    runs: u64,

    /// Timer executable understanding -f%U
    #[arg(long, default_value = "/usr/bin/time")]
    timer: PathBuf,

    /// Command to time
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupt);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("installing the Ctrl-C handler")?;
    }

    match cli.command {
        Cmd::Measure(args) => cmd_measure(args, &interrupt),
        Cmd::Memwatch(args) => cmd_memwatch(args, &interrupt),
        Cmd::Convert(args) => cmd_convert(args),
        Cmd::Time(args) => cmd_time(args, &interrupt),
    }
}

fn cmd_measure(args: MeasureArgs, interrupt: &AtomicBool) -> Result<()> {
    if args.events < 1 {
        anyhow::bail!("the first run needs at least one event");
    }
    if args.target <= 0.0 {
        anyhow::bail!("the target time must be positive, got {}", args.target);
    }

    let mut extra_args = Vec::new();
    if let Some(cutoff) = args.cutoff {
        extra_args.push(format!("--cutoff={}", cutoff));
    }
    if let Some(model) = &args.model {
        extra_args.push(format!("--model={}", model));
    }
    extra_args.extend(args.params.iter().cloned());

    let command = SimCommand {
        executable: args.executable,
        energy: args.energy,
        aoi: args.aoi,
        events: args.events,
        extra_args,
    };

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let stdout_path = args.out_dir.join("fgamma.stdout.txt");
    let mut audit = AuditLog::create(&stdout_path)
        .with_context(|| format!("creating {}", stdout_path.display()))?;

    println!("Target time: {} s", args.target);

    let mut session = Session::new(SessionConfig {
        command,
        target_seconds: args.target,
    });
    let outcome = session.run(
        |line| audit.record_line(line),
        |stats| println!("{}", report::run_brief(stats)),
        interrupt,
    );

    println!("Total elapsed: {:.2} s", session.elapsed());

    // Completed runs stay readable no matter how the session ended.
    if let Err(write_err) =
        write_session_artifacts(&args.out_dir, args.energy, args.aoi, args.cutoff, &session)
    {
        match &outcome {
            // The session's own failure stays the reported error.
            Err(_) => log::warn!("could not write artifacts: {}", write_err),
            Ok(_) => return Err(write_err),
        }
    }

    match outcome {
        Ok(stop) => {
            if let Ok(stats) = session.stats() {
                println!("{}", report::session_summary(&stats, stop));
            } else {
                println!("Interrupted before the first run finished.");
            }
            Ok(())
        }
        Err(err) => {
            if let Some(FgtoolsError::ChildProcess { output, .. }) =
                err.downcast_ref::<FgtoolsError>()
            {
                eprintln!("{}", report::failure_banner(output));
            }
            Err(err)
        }
    }
}

/// `data.json` and, when the statistics are computable, `results.json` from
/// whatever the session recorded. A session without runs writes nothing.
fn write_session_artifacts(
    out_dir: &Path,
    energy: f64,
    aoi: f64,
    cutoff: Option<f64>,
    session: &Session,
) -> Result<()> {
    if session.runs().is_empty() {
        return Ok(());
    }
    report::write_data(&out_dir.join("data.json"), session.runs())?;
    if let Ok(stats) = session.stats() {
        let doc = ResultsDoc::new(energy, aoi, cutoff, &stats);
        report::write_results(&out_dir.join("results.json"), &doc)?;
    }
    Ok(())
}

fn cmd_memwatch(args: MemwatchArgs, interrupt: &AtomicBool) -> Result<()> {
    let command = SimCommand {
        executable: args.executable,
        energy: args.energy,
        aoi: args.aoi,
        events: args.events,
        extra_args: args.params,
    };

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let stdout_path = args.out_dir.join("fgamma.stdout.txt");
    let log_path = args.out_dir.join("memlog.csv");

    println!("Command: {}", command);

    let stdout_file = File::create(&stdout_path)
        .with_context(|| format!("creating {}", stdout_path.display()))?;
    let stderr_file = stdout_file
        .try_clone()
        .context("duplicating the stdout log handle")?;

    let mut child = command
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|source| FgtoolsError::Spawn {
            program: command.executable.display().to_string(),
            source,
        })?;

    let watcher = MemWatcher::spawn(
        child.id(),
        &log_path,
        Duration::from_millis(args.interval_ms),
    )?;
    let status = child.wait().context("waiting for the simulator")?;
    let rows = watcher.stop();

    println!("Wrote {} samples to {}", rows, log_path.display());

    if !status.success() {
        if interrupt.load(Ordering::SeqCst) {
            println!("Interrupted; partial log kept.");
            return Ok(());
        }
        anyhow::bail!(
            "fgamma exited with {}; its output is in {}",
            status,
            stdout_path.display()
        );
    }
    Ok(())
}

fn cmd_convert(args: ConvertArgs) -> Result<()> {
    solar::convert(&args.input, &args.output)?;
    println!("{} -> {}", args.input.display(), args.output.display());
    Ok(())
}

fn cmd_time(args: TimeArgs, interrupt: &AtomicBool) -> Result<()> {
    println!("Start measuring..");
    let outcome = timing::time_repeated(
        &args.timer,
        &args.command,
        args.runs,
        interrupt,
        |_, secs| println!(" - measured: {}", secs),
    )?;

    if outcome.interrupted {
        println!("Measurement interrupted.");
    }
    match timing::summarize(&outcome.samples) {
        Some(text) => println!("{}", text),
        None => println!("No measurements, no math!"),
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
