//! Exercises the compiled vulnerable fixture directly (seed scenario 1:
//! a payload containing "CRASH" should terminate the victim by signal;
//! anything else should exit normally). The full forkserver/interposer
//! path needs the preloaded cdylib built as a sibling artifact, which is
//! outside what a `cargo test`-driven fixture can set up on stable Cargo,
//! so this test drives the fixture the same way the fork-exec fallback in
//! `forkserver.rs` does: stdin piped directly into a freshly spawned child.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

fn crash_target_path() -> Option<&'static str> {
    option_env!("CRASH_TARGET_PATH")
}

fn run_with_stdin(path: &str, input: &[u8]) -> std::process::ExitStatus {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn compiled fixture");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(input)
        .expect("failed to write to fixture stdin");

    child.wait().expect("failed to wait on fixture")
}

#[test]
fn benign_input_exits_normally() {
    let Some(path) = crash_target_path() else {
        eprintln!("skipping: fixture not compiled");
        return;
    };
    let status = run_with_stdin(path, b"hello world\n");
    assert_eq!(status.signal(), None);
    assert_eq!(status.code(), Some(0));
}

#[test]
fn crash_substring_terminates_by_signal() {
    let Some(path) = crash_target_path() else {
        eprintln!("skipping: fixture not compiled");
        return;
    };
    let status = run_with_stdin(path, b"leading text CRASH trailing text\n");
    assert_eq!(status.signal(), Some(11));
}

#[test]
fn long_input_overruns_stack_buffer_without_hanging() {
    let Some(path) = crash_target_path() else {
        eprintln!("skipping: fixture not compiled");
        return;
    };
    let payload = vec![b'A'; 4096];
    let status = run_with_stdin(path, &payload);
    // Overflowing the 64-byte stack buffer either crashes the fixture via
    // stack-protector abort or, without one, corrupts state silently; both
    // are acceptable outcomes here — only a hang would indicate a bug in
    // this test's plumbing.
    assert!(status.signal().is_some() || status.code().is_some());
}
