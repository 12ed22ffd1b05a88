//! Deterministic PRNG, elapsed-time tracking, ELF class sniffing and
//! environment-table merging.
//!
//! The generator is a classic glibc-style linear congruential generator, not
//! [`rand`][rand_crate] — reproducibility across runs with the same seed
//! matters more here than statistical quality, since a seed is how a crash
//! found on one run gets reproduced later.
//!
//! [rand_crate]: https://docs.rs/rand

use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FuzzError, Result};

/// `next = next * 1103515245 + 12345`, yielding bits 16..31 mod 32768.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Seeds from the current wall clock, microsecond resolution.
    pub fn from_time() -> Self {
        Self::new(now_micros() as u32)
    }

    fn next_raw(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.state >> 16) % 32_768
    }

    /// Inclusive on both ends. Returns `min` if `min >= max`.
    pub fn rand_range(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        let span = (max - min + 1) as u64;
        min + (self.next_raw() as u64 % span) as i64
    }
}

/// Wall-clock microseconds since the epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Start timestamp plus a budget; `elapsed()` is in seconds.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutTracker {
    start_micros: u64,
    timeout_seconds: u64,
}

impl TimeoutTracker {
    pub fn start(timeout_seconds: u64) -> Self {
        Self {
            start_micros: now_micros(),
            timeout_seconds,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        now_micros().saturating_sub(self.start_micros) as f64 / 1_000_000.0
    }

    pub fn expired(&self) -> bool {
        self.elapsed_seconds() >= self.timeout_seconds as f64
    }
}

/// Reads the first sixteen bytes of the target binary at `path`, verifies
/// the ELF magic, and checks the `EI_CLASS` byte. Refuses anything that is
/// not 64-bit.
pub fn assert_elf64(path: &Path) -> Result<()> {
    let mut f = File::open(path).map_err(|_| FuzzError::UnreadableTarget(path.to_owned()))?;
    let mut header = [0u8; 16];
    f.read_exact(&mut header)
        .map_err(|_| FuzzError::UnreadableTarget(path.to_owned()))?;

    const ELFMAG: &[u8] = b"\x7fELF";
    const ELFCLASS64: u8 = 2;

    if &header[0..4] != ELFMAG {
        return Err(FuzzError::NotElf64(path.to_owned()));
    }
    if header[4] != ELFCLASS64 {
        return Err(FuzzError::NotElf64(path.to_owned()));
    }
    Ok(())
}

/// Concatenates the inherited environment with a set of overrides, with the
/// overrides taking precedence and appearing first — mirrors the original's
/// "prepend LD_PRELOAD/LD_BIND_NOW" env-array merge.
pub fn merge_env(overrides: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
    let mut merged: Vec<(OsString, OsString)> = overrides
        .iter()
        .map(|(k, v)| (OsString::from(k), OsString::from(v)))
        .collect();
    for (k, v) in std::env::vars_os() {
        if !overrides.iter().any(|(ok, _)| OsString::from(ok) == k) {
            merged.push((k, v));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_range_inclusive_both_ends() {
        let mut rng = Rng::new(42);
        for _ in 0..1000 {
            let v = rng.rand_range(3, 7);
            assert!((3..=7).contains(&v));
        }
    }

    #[test]
    fn rand_range_degenerate_returns_min() {
        let mut rng = Rng::new(1);
        assert_eq!(rng.rand_range(5, 5), 5);
        assert_eq!(rng.rand_range(9, 2), 9);
    }

    #[test]
    fn rand_range_is_deterministic_for_a_fixed_seed() {
        let mut a = Rng::new(7);
        let mut b = Rng::new(7);
        let seq_a: Vec<i64> = (0..20).map(|_| a.rand_range(0, 1_000_000)).collect();
        let seq_b: Vec<i64> = (0..20).map(|_| b.rand_range(0, 1_000_000)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn timeout_tracker_zero_budget_expires_immediately() {
        let t = TimeoutTracker::start(0);
        assert!(t.expired());
    }

    #[test]
    fn assert_elf64_rejects_non_elf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_elf");
        std::fs::write(&path, b"not an elf file at all!").unwrap();
        assert!(assert_elf64(&path).is_err());
    }

    #[test]
    fn assert_elf64_accepts_elf64_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake_elf64");
        let mut header = vec![0u8; 16];
        header[0..4].copy_from_slice(b"\x7fELF");
        header[4] = 2; // ELFCLASS64
        std::fs::write(&path, &header).unwrap();
        assert!(assert_elf64(&path).is_ok());
    }
}
