//! Ties the pieces together for one run: reads the seed, detects its
//! format, brings up the forkserver, and dispatches into the matching
//! engine (or logs and stops for a format with no engine).

use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nix::sys::mman::{mmap, MapFlags, ProtFlags};
use std::num::NonZeroUsize;

use crate::engine::{EngineContext, RunConfig};
use crate::error::{FuzzError, Result};
use crate::format_detect::{self, FileType};
use crate::forkserver::ForkserverDriver;
use crate::{csv_fuzz, json_fuzz};

/// Reads the seed file through a read-write private mapping and copies it
/// into an owned buffer; the mapping itself is dropped once copied, since
/// every downstream consumer works on an owned `Vec<u8>`.
fn read_seed(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| FuzzError::UnreadableSeed(path.to_owned(), e))?;
    let len = file
        .metadata()
        .map_err(|e| FuzzError::UnreadableSeed(path.to_owned(), e))?
        .len() as usize;

    if len == 0 {
        return Ok(Vec::new());
    }

    let map = unsafe {
        mmap(
            None,
            NonZeroUsize::new(len).unwrap(),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE,
            &file,
            0,
        )
    };
    let ptr = map.map_err(|e| FuzzError::Io(std::io::Error::from_raw_os_error(e as i32)))?;

    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr() as *const u8, len) }.to_vec();
    unsafe {
        let _ = nix::sys::mman::munmap(ptr, len);
    }
    Ok(bytes)
}

/// Runs one fuzzing session to completion. Returns `Ok(())` on a clean
/// stop (iteration cap, deadline, or a shutdown signal); startup failures
/// (unreadable target/seed, forkserver spawn failure) are the only
/// failures that propagate as `Err`.
pub fn run(config: RunConfig, interposer_path: &Path, quitting: Arc<AtomicBool>) -> Result<()> {
    crate::util::assert_elf64(&config.target)?;
    let seed = read_seed(&config.seed)?;

    let file_type = format_detect::detect_file_type(&seed);
    log::info!(
        "seed {:?} ({} bytes) detected as {}",
        config.seed,
        seed.len(),
        file_type.as_str()
    );

    let mut driver = ForkserverDriver::spawn(&config.target, interposer_path)?;
    if !driver.is_enabled() {
        log::warn!("running in degraded per-iteration fork-exec mode");
    }

    let mut ctx = EngineContext::new(&mut driver, config, quitting);

    let outcome = match file_type {
        FileType::Json => json_fuzz::run(&seed, &mut ctx),
        FileType::Csv => csv_fuzz::run(&seed, &mut ctx),
        other => {
            log::info!("{} not implemented. Skipping.", other.as_str());
            Ok(())
        }
    };

    if let Err(msg) = outcome {
        log::warn!("engine could not run: {msg}");
    }

    log::info!("ran {} iterations", ctx.iteration);
    driver.shutdown();
    outcome.map_err(FuzzError::SeedParseFailed)
}
