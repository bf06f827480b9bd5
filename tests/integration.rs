use assert_cmd::Command;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::fs;

/// Stub simulator: reads the event count out of the `E=..,aoi=..,n=..`
/// token and prints one progress line per event. Small runs (n <= 3) take
/// one fake second per event, bigger runs a hundred, so a 10 s budget is
/// spent after exactly two runs.
#[cfg(unix)]
const ADAPTIVE_STUB: &str = r#"token="$1"
n="${token##*n=}"
if [ "$n" -le 3 ]; then dt=1; else dt=100; fi
echo "loading geometry"
t=1
i=1
while [ "$i" -le "$n" ]; do
  t=$((t + dt))
  echo "% event $i 0.00 0.00 $t.0"
  i=$((i + 1))
done
t=$((t + dt))
echo "% done 0.00 0.00 $t.0"
"#;

/// Stub that handles the first small run, then dies as soon as the
/// controller asks for a bigger one.
#[cfg(unix)]
const FAILS_ON_BIG_RUNS_STUB: &str = r#"token="$1"
n="${token##*n=}"
if [ "$n" -gt 3 ]; then
  echo "out of memory"
  exit 7
fi
t=1
i=1
while [ "$i" -le "$n" ]; do
  t=$((t + 1))
  echo "% event $i 0.00 0.00 $t.0"
  i=$((i + 1))
done
t=$((t + 1))
echo "% done 0.00 0.00 $t.0"
"#;

#[cfg(unix)]
fn write_stub(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fgtools_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fgtools").unwrap();
    cmd.current_dir(dir.path());
    cmd.env("NO_COLOR", "1");
    cmd
}

// ---- measure tests ----

#[cfg(unix)]
#[test]
fn measure_session_spends_the_budget_and_writes_artifacts() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(&tmp, "fgamma", ADAPTIVE_STUB);

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-t", "10", "--exec"])
        .arg(&stub)
        .assert()
        .success()
        .stdout(predicate::str::contains("Target time: 10 s"))
        .stdout(predicate::str::contains("Measure: "))
        .stdout(predicate::str::contains("Stats: dts: 1.00 (0.00)"))
        .stdout(predicate::str::contains("Total elapsed:"))
        .stdout(predicate::str::contains("Session complete"));

    // First run: 3 events at 1 s each, first event after 2 s, done at 5 s.
    let data: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("data.json")).unwrap()).unwrap();
    let runs = data.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["first"], 2.0);
    assert_eq!(runs[0]["total"], 5.0);
    assert_eq!(runs[0]["dts"], serde_json::json!([1.0, 1.0, 1.0]));
    assert_eq!(runs[1]["first"], 101.0);
    for dt in runs[1]["dts"].as_array().unwrap() {
        assert_eq!(dt.as_f64().unwrap(), 100.0);
    }

    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results["params"]["E"], 20.0);
    assert_eq!(results["params"]["aoi"], 0.5);
    assert!(results["params"]["cutoff"].is_null());
    assert_eq!(results["boot"]["n"], 2);
    assert_eq!(results["boot"]["mean"], 51.5);
    assert!(results["event"]["n"].as_u64().unwrap() >= 7);
    assert!(results["event"]["mean"].as_f64().unwrap() > 50.0);

    // The audit log holds both runs divided by one separator line.
    let audit = fs::read_to_string(tmp.path().join("fgamma.stdout.txt")).unwrap();
    let sep = "+".repeat(80);
    assert_eq!(audit.lines().filter(|&l| l == sep).count(), 1);
    assert_eq!(audit.lines().next().unwrap(), "loading geometry");
    assert!(audit.contains("% done"));
}

#[cfg(unix)]
#[test]
fn measure_failed_first_run_prints_the_captured_output() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(
        &tmp,
        "fgamma",
        "echo 'entering main loop'\necho 'boom' >&2\nexit 3",
    );

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-t", "10", "--exec"])
        .arg(&stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("FGAMMA STDOUT"))
        .stderr(predicate::str::contains("boom"))
        .stderr(predicate::str::contains("fgamma failed (exit status: 3)"));

    assert!(!tmp.path().join("data.json").exists());
    assert!(!tmp.path().join("results.json").exists());
    let audit = fs::read_to_string(tmp.path().join("fgamma.stdout.txt")).unwrap();
    assert!(audit.contains("entering main loop"));
}

#[cfg(unix)]
#[test]
fn measure_keeps_artifacts_from_runs_before_a_failure() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(&tmp, "fgamma", FAILS_ON_BIG_RUNS_STUB);

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-t", "10", "-c", "2.5", "--exec"])
        .arg(&stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of memory"));

    let data: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("data.json")).unwrap()).unwrap();
    assert_eq!(data.as_array().unwrap().len(), 1);

    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results["params"]["cutoff"], 2.5);
    assert_eq!(results["boot"]["n"], 1);
    assert_eq!(results["event"]["n"], 3);
}

#[cfg(unix)]
#[test]
fn measure_failure_is_reported_even_when_artifacts_cannot_be_written() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(&tmp, "fgamma", FAILS_ON_BIG_RUNS_STUB);
    // A directory squatting on data.json makes the artifact write fail.
    fs::create_dir(tmp.path().join("data.json")).unwrap();

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-t", "10", "--exec"])
        .arg(&stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("FGAMMA STDOUT"))
        .stderr(predicate::str::contains("out of memory"))
        .stderr(predicate::str::contains("fgamma failed (exit status: 7)"))
        .stderr(predicate::str::contains("data.json").not());
}

#[cfg(unix)]
#[test]
fn measure_rejects_malformed_progress_lines() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(
        &tmp,
        "fgamma",
        "echo '% event 1 0.00'\necho '% done 0.00 0.00 1.0'",
    );

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "--exec"])
        .arg(&stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed progress line"));
}

#[test]
fn measure_rejects_zero_events() {
    let tmp = TempDir::new().unwrap();

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-n", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one event"));
}

#[test]
fn measure_rejects_non_positive_target() {
    let tmp = TempDir::new().unwrap();

    fgtools_cmd(&tmp)
        .args(["measure", "20", "0.5", "-t", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("target time must be positive"));
}

// ---- memwatch tests ----

#[cfg(unix)]
#[test]
fn memwatch_logs_samples_while_the_simulator_runs() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(&tmp, "fgamma", "echo 'chewing photons'\nsleep 1\necho 'full'");

    fgtools_cmd(&tmp)
        .args(["memwatch", "20", "0.5", "--interval-ms", "50", "--exec"])
        .arg(&stub)
        .assert()
        .success()
        .stdout(predicate::str::contains("Command: "))
        .stdout(predicate::str::contains("samples to"));

    let log = fs::read_to_string(tmp.path().join("memlog.csv")).unwrap();
    assert!(!log.is_empty());
    for line in log.lines() {
        assert_eq!(line.split(',').count(), 4, "bad row: {:?}", line);
    }

    let captured = fs::read_to_string(tmp.path().join("fgamma.stdout.txt")).unwrap();
    assert!(captured.contains("chewing photons"));
    assert!(captured.contains("full"));
}

#[cfg(unix)]
#[test]
fn memwatch_reports_simulator_failure() {
    let tmp = TempDir::new().unwrap();
    let stub = write_stub(&tmp, "fgamma", "echo 'dying'\nexit 9");

    fgtools_cmd(&tmp)
        .args(["memwatch", "20", "0.5", "--exec"])
        .arg(&stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("fgamma exited with"));

    assert!(tmp.path().join("memlog.csv").exists());
    assert!(
        fs::read_to_string(tmp.path().join("fgamma.stdout.txt"))
            .unwrap()
            .contains("dying")
    );
}

// ---- convert tests ----

#[test]
fn convert_builds_the_yaml_model_from_the_fixture() {
    let tmp = TempDir::new().unwrap();
    let fixture = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/sun_composition.dat");
    let output = tmp.path().join("solarmodel.yml");

    fgtools_cmd(&tmp)
        .arg("convert")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("solarmodel.yml"));

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.starts_with("# Solar atmosphere\n"));

    let model: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    assert_eq!(model["name"], "The Sun");
    let layers = model["layers"].as_sequence().unwrap();
    assert_eq!(layers.len(), 2);
    // Layer thickness is the difference of consecutive radii.
    assert!((layers[0]["thickness"].as_f64().unwrap() - 0.5).abs() < 1e-9);
    assert!((layers[1]["thickness"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(layers[0]["temperature"].as_f64().unwrap(), 5800.0);
    // 1000 dyne/cm2 -> 100 Pa.
    assert!((layers[0]["pressure"].as_f64().unwrap() - 100.0).abs() < 1e-9);

    let components = layers[0]["components"].as_sequence().unwrap();
    assert_eq!(components.len(), 24);
    assert_eq!(components[0]["element"], "H");
    assert_eq!(components[20]["element"], "He");
    assert_eq!(components[20]["isotopes"][0]["A"], 3);
}

#[test]
fn convert_missing_input_fails() {
    let tmp = TempDir::new().unwrap();

    fgtools_cmd(&tmp)
        .args(["convert", "nope.dat", "out.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read composition table"));
}

// ---- time tests ----

#[cfg(unix)]
#[test]
fn time_reports_mean_and_spread() {
    let tmp = TempDir::new().unwrap();
    let timer = write_stub(
        &tmp,
        "truetime",
        "shift\n\"$@\" > /dev/null 2>&1\necho \"0.50\" >&2",
    );

    fgtools_cmd(&tmp)
        .args(["time", "-n", "2", "--timer"])
        .arg(&timer)
        .args(["echo", "hi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Start measuring.."))
        .stdout(predicate::str::contains(" - measured: 0.5"))
        .stdout(predicate::str::contains("Measured 2 times."))
        .stdout(predicate::str::contains("Mean utime:    0.50"));
}

#[cfg(unix)]
#[test]
fn time_single_run_reports_once() {
    let tmp = TempDir::new().unwrap();
    let timer = write_stub(&tmp, "truetime", "echo \"0.25\" >&2");

    fgtools_cmd(&tmp)
        .args(["time", "-n", "1", "--timer"])
        .arg(&timer)
        .arg("true")
        .assert()
        .success()
        .stdout(predicate::str::contains("Measured once: 0.25"));
}

#[test]
fn time_zero_runs_has_no_math() {
    let tmp = TempDir::new().unwrap();

    fgtools_cmd(&tmp)
        .args(["time", "-n", "0", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No measurements, no math!"));
}
