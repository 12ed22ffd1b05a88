//! Append-only crash/hang recording under `bad_<basename>.txt` /
//! `hang_<basename>.txt`.
//!
//! Never fails fatally: an open error is logged and swallowed, since a
//! triage file the fuzzer can't write to must not take the whole run down.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const OUTPUT_DIR: &str = "/fuzzer_outputs";

fn signal_name(signal: i32) -> &'static str {
    match signal {
        4 => "SIGILL",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        11 => "SIGSEGV",
        _ => "UNKNOWN",
    }
}

fn basename(program_path: &Path) -> String {
    program_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn archive_path(file_name: &str) -> PathBuf {
    let dir = Path::new(OUTPUT_DIR);
    if dir.is_dir() {
        dir.join(file_name)
    } else {
        PathBuf::from(file_name)
    }
}

fn append(path: &Path, contents: &[u8]) {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            if let Err(e) = f.write_all(contents) {
                log::warn!("failed to write archive record to {path:?}: {e}");
            }
        }
        Err(e) => {
            log::warn!("failed to open archive file {path:?}: {e}");
        }
    }
}

/// Appends one crash record: iteration header, signal name line, delimiter,
/// raw payload bytes, closing delimiter.
pub fn save_bad(program_path: &Path, data: &[u8], iteration: u64, signal: i32) {
    let path = archive_path(&format!("bad_{}.txt", basename(program_path)));
    let mut record = Vec::new();
    record.extend_from_slice(format!("=== Iteration {iteration} ===\n").as_bytes());
    record.extend_from_slice(format!("Signal: {signal} ({})\n", signal_name(signal)).as_bytes());
    record.extend_from_slice(b"--- payload ---\n");
    record.extend_from_slice(data);
    record.extend_from_slice(b"\n--- end ---\n\n");
    append(&path, &record);
}

/// Appends one hang record: iteration header (no signal line), delimiters,
/// raw payload bytes.
pub fn save_hang(program_path: &Path, data: &[u8], iteration: u64) {
    let path = archive_path(&format!("hang_{}.txt", basename(program_path)));
    let mut record = Vec::new();
    record.extend_from_slice(format!("=== Iteration {iteration} (TIMEOUT) ===\n").as_bytes());
    record.extend_from_slice(b"--- payload ---\n");
    record.extend_from_slice(data);
    record.extend_from_slice(b"\n--- end ---\n\n");
    append(&path, &record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn save_bad_writes_expected_header_and_signal_line() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        save_bad(Path::new("/usr/bin/victim"), b"CRASHME", 42, 11);

        let contents = fs::read_to_string("bad_victim.txt").unwrap();
        assert!(contents.contains("=== Iteration 42 ==="));
        assert!(contents.contains("Signal: 11 (SIGSEGV)"));
        assert!(contents.contains("CRASHME"));

        std::env::set_current_dir(cwd).unwrap();
    }

    #[test]
    fn save_hang_has_no_signal_line() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        save_hang(Path::new("/usr/bin/victim"), b"slow", 7);

        let contents = fs::read_to_string("hang_victim.txt").unwrap();
        assert!(contents.contains("=== Iteration 7 (TIMEOUT) ==="));
        assert!(!contents.contains("Signal:"));

        std::env::set_current_dir(cwd).unwrap();
    }

    #[test]
    fn unknown_signal_is_labelled_unknown() {
        assert_eq!(signal_name(99), "UNKNOWN");
        assert_eq!(signal_name(4), "SIGILL");
    }
}
