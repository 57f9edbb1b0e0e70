#![cfg(unix)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/chanmux-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        assert!(
            start.elapsed() < timeout,
            "session socket never appeared at {}",
            path.display()
        );
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_host(sock: &Path, command: &[&str]) -> std::process::Child {
    Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .args(["--log-level", "error", "host"])
        .arg(sock)
        .arg("--once")
        .arg("--")
        .args(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("host should start")
}

#[test]
fn session_bridges_stdio_and_reports_success() {
    let dir = unique_temp_dir("cat");
    let sock = dir.join("session.sock");
    let mut host = spawn_host(&sock, &["/bin/cat"]);
    wait_for_socket(&sock, Duration::from_secs(3));

    let mut attach = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .args(["--log-level", "error", "attach"])
        .arg(&sock)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("attach should start");

    attach
        .stdin
        .take()
        .expect("attach stdin")
        .write_all(b"echoed through the mux\n")
        .expect("stdin write");
    // Dropping the handle closes attach's stdin; the EOF travels through
    // the session and ends the remote cat.

    let output = attach.wait_with_output().expect("attach should finish");
    assert!(output.status.success(), "attach failed: {:?}", output.status);
    assert_eq!(output.stdout, b"echoed through the mux\n");

    let host_status = host.wait().expect("host should exit");
    assert!(host_status.success());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn attach_exits_with_remote_status() {
    let dir = unique_temp_dir("status");
    let sock = dir.join("session.sock");
    let mut host = spawn_host(&sock, &["/bin/sh", "-c", "exit 7"]);
    wait_for_socket(&sock, Duration::from_secs(3));

    let status = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .args(["--log-level", "error", "attach"])
        .arg(&sock)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("attach should finish");

    assert_eq!(status.code(), Some(7));
    host.wait().expect("host should exit");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn remote_stderr_lands_on_local_stderr() {
    let dir = unique_temp_dir("stderr");
    let sock = dir.join("session.sock");
    let mut host = spawn_host(&sock, &["/bin/sh", "-c", "echo over here >&2"]);
    wait_for_socket(&sock, Duration::from_secs(3));

    let output = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .args(["--log-level", "error", "attach"])
        .arg(&sock)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("attach should finish");

    assert!(output.status.success());
    assert_eq!(output.stderr, b"over here\n");
    host.wait().expect("host should exit");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8 output");
    assert!(stdout.contains("chanmux"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
