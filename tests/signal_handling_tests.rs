// Signal handling integration tests
//
// The binary reads from a pipe that stays open, so only a signal can end the
// run early.

#![cfg(unix)]

mod common;

use common::*;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use pairlog::store::EventStore;

/// Start pairlog reading its own stdin into `<dir>/out.sqlite`
fn spawn_on_stdin(dir: &Path) -> Child {
    pairlog_command(dir)
        .args(["/dev/stdin", "out.sqlite", "--workers", "2", "--idle-ms", "10"])
        .stdin(Stdio::piped())
        .spawn()
        .expect("Failed to spawn pairlog")
}

fn write_lines(child: &mut Child, lines: &[String]) {
    let stdin = child.stdin.as_mut().expect("stdin should be piped");
    for line in lines {
        writeln!(stdin, "{}", line).expect("Failed to write to stdin");
    }
    stdin.flush().expect("Failed to flush stdin");
}

/// Wait until the database holds `expected` pairs
fn wait_for_stored(db: &Path, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stored = if db.exists() {
            EventStore::open(db)
                .ok()
                .and_then(|store| store.count().ok())
                .unwrap_or(0)
        } else {
            0
        };
        if stored >= expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "only {} of {} pairs stored in time",
            stored,
            expected
        );
        thread::sleep(Duration::from_millis(20));
    }
}

fn send_signal(child: &Child, signal: &str) {
    Command::new("kill")
        .args([signal, &child.id().to_string()])
        .output()
        .expect("Failed to send signal");
}

fn pairs(count: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for i in 0..count {
        lines.push(log_line(&format!("p{}", i), "req", "h1", 1));
        lines.push(log_line(&format!("p{}", i), "req", "h1", 3));
    }
    lines
}

fn stop_with_signal(signal: &str) -> (Output, u64) {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("out.sqlite");
    let mut child = spawn_on_stdin(dir.path());

    write_lines(&mut child, &pairs(20));
    wait_for_stored(&db, 20);

    send_signal(&child, signal);
    let output = child.wait_with_output().expect("Failed to read output");
    let stored = EventStore::open(&db).unwrap().count().unwrap();
    (output, stored)
}

#[test]
fn test_sigint_drains_and_exits_130() {
    let (output, stored) = stop_with_signal("-INT");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(130), "stderr:\n{}", stderr);
    assert_eq!(stored, 20);
    assert!(
        stderr.contains("stop signal received"),
        "stderr should report the stop. stderr:\n{}",
        stderr
    );
    assert!(stderr.contains("stopped all workers"), "stderr:\n{}", stderr);
}

#[test]
fn test_sigterm_drains_and_exits_143() {
    let (output, stored) = stop_with_signal("-TERM");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(143), "stderr:\n{}", stderr);
    assert_eq!(stored, 20);
    assert!(stderr.contains("stop requested"), "stderr:\n{}", stderr);
}

#[test]
fn test_sigusr1_dumps_pending_and_continues() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("out.sqlite");
    let mut child = spawn_on_stdin(dir.path());

    let mut lines = vec![log_line("waiting-1", "req", "h1", 5)];
    lines.extend(pairs(1));
    write_lines(&mut child, &lines);
    wait_for_stored(&db, 1);

    send_signal(&child, "-USR1");
    thread::sleep(Duration::from_millis(300));

    // More input after the dump is still processed
    write_lines(&mut child, &pairs(2)[2..]);
    drop(child.stdin.take());

    let output = child.wait_with_output().expect("Failed to read output");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(0), "stderr:\n{}", stderr);
    assert!(
        stderr.contains("pending index dump"),
        "stderr should contain the dump after SIGUSR1. stderr:\n{}",
        stderr
    );
    // Once in the dump and once in the shutdown report
    assert!(stderr.matches("id=waiting-1").count() >= 2, "stderr:\n{}", stderr);
    assert_eq!(EventStore::open(&db).unwrap().count().unwrap(), 2);
}
