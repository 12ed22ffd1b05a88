//! The typed error hierarchy for the startup path.
//!
//! Only initialisation errors ever propagate as a [`Result`]. Per-iteration
//! and per-strategy failures are represented locally as `Option`/`bool` and
//! must never be converted into one of these variants partway through a run.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FuzzError {
    #[error("target binary {0:?} is not a readable file")]
    UnreadableTarget(PathBuf),

    #[error("seed file {0:?} could not be opened: {1}")]
    UnreadableSeed(PathBuf, #[source] io::Error),

    #[error("target {0:?} is not a 64-bit ELF executable")]
    NotElf64(PathBuf),

    #[error("forkserver TEST handshake failed: {0}")]
    ForkserverHandshakeFailed(String),

    #[error("failed to spawn forkserver child: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("memfd_create failed: {0}")]
    MemfdCreateFailed(#[source] nix::Error),

    #[error("pipe() failed: {0}")]
    PipeFailed(#[source] nix::Error),

    #[error("seed could not be parsed as {0}")]
    SeedParseFailed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FuzzError>;
