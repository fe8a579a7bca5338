#![cfg(unix)]
//! Runs the `simulator` binary and checks how the process ends.

use std::{
    io::{BufRead, BufReader},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use testresult::TestResult;

const SIMULATOR: &str = env!("CARGO_BIN_EXE_simulator");
const TIMEOUT: Duration = Duration::from_secs(30);

/// Controllers sleep for a run-unique number of seconds so leftovers can be
/// told apart from other processes on the machine.
fn controller_secs(offset: u32) -> u32 {
    40_000 + (std::process::id() % 5_000) * 2 + offset
}

fn write_experiment(root: &Path, name: &str, secs: u32) -> std::io::Result<()> {
    std::fs::create_dir_all(root.join("config"))?;
    std::fs::write(
        root.join("config").join(format!("{name}.toml")),
        format!(
            r#"
topology_class = "mesh"
patch_panel_class = "immediate"

[control_flow]
kind = "fuzzer"
seed = 11
delay_ms = 0
controller_crash_rate = 0.0

[[controllers]]
cmdline = "sleep {secs}"
label = "first"

[[controllers]]
cmdline = "sleep {secs}"
label = "second"
"#
        ),
    )
}

fn launch(config_dir: &Path, experiment: &str) -> std::io::Result<Child> {
    Command::new(SIMULATOR)
        .arg("--config-dir")
        .arg(config_dir)
        .args(["-c", experiment])
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .env_remove("STS_DISABLE_LOGS")
        .env_remove("STS_LOG_TO_STDERR")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Blocks until the simulator logs `message`, draining its output afterwards.
fn wait_for_log(child: &mut Child, message: &'static str) -> TestResult {
    let stdout = child.stdout.take().ok_or("stdout not piped")?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if line.contains(message) {
                let _ = tx.send(());
            }
        }
    });
    rx.recv_timeout(TIMEOUT)
        .map_err(|_| format!("simulator never logged `{message}`"))?;
    Ok(())
}

fn send_signal(child: &Child, signal: &str) -> TestResult {
    let status = Command::new("kill")
        .args(["-s", signal, &child.id().to_string()])
        .status()?;
    assert!(status.success(), "kill -s {signal} failed");
    Ok(())
}

fn wait_with_timeout(child: &mut Child) -> Result<ExitStatus, Box<dyn std::error::Error>> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() > deadline {
            child.kill()?;
            return Err("simulator did not exit after the signal".into());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(target_os = "linux")]
fn running_controllers(secs: u32) -> Option<usize> {
    let cmdline = format!("sleep\0{secs}\0");
    let count = std::fs::read_dir("/proc")
        .ok()?
        .flatten()
        .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
        .filter(|found| found == cmdline.as_bytes())
        .count();
    Some(count)
}

#[cfg(not(target_os = "linux"))]
fn running_controllers(_secs: u32) -> Option<usize> {
    None
}

fn interrupted_run(signal: &str, offset: u32) -> TestResult {
    let dir = tempfile::tempdir()?;
    let secs = controller_secs(offset);
    write_experiment(dir.path(), "endless", secs)?;

    let mut child = launch(dir.path(), "endless")?;
    wait_for_log(&mut child, "Starting simulation")?;
    if let Some(running) = running_controllers(secs) {
        assert_eq!(running, 2);
    }

    send_signal(&child, signal)?;
    let status = wait_with_timeout(&mut child)?;
    assert_eq!(status.code(), Some(sts::signals::SIGNAL_EXIT_CODE));
    if let Some(running) = running_controllers(secs) {
        assert_eq!(running, 0, "controllers outlived the simulator");
    }
    Ok(())
}

#[test]
fn sigint_stops_controllers_and_exits_cleanly() -> TestResult {
    interrupted_run("INT", 0)
}

#[test]
fn sigterm_stops_controllers_and_exits_cleanly() -> TestResult {
    interrupted_run("TERM", 1)
}

#[test]
fn unknown_experiment_exits_with_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = Command::new(SIMULATOR)
        .arg("--config-dir")
        .arg(dir.path())
        .args(["-c", "no_such_experiment"])
        .env("STS_DISABLE_LOGS", "1")
        .stdin(Stdio::null())
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("resolution failed"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn experiment_without_controllers_exits_with_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir(dir.path().join("config"))?;
    std::fs::write(
        dir.path().join("config").join("empty.toml"),
        "topology_class = \"mesh\"\n",
    )?;
    let status = Command::new(SIMULATOR)
        .arg("--config-dir")
        .arg(dir.path())
        .args(["-c", "config/empty.toml"])
        .env("STS_DISABLE_LOGS", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}
