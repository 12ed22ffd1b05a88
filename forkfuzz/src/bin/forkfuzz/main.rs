use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use forkfuzz::cli::Cli;
use forkfuzz::engine::RunConfig;
use forkfuzz::error::FuzzError;
use forkfuzz::orchestrator;

const INTERPOSER_SONAME: &str = "libforkfuzz_interposer.so";

/// The interposer cdylib is a sibling workspace member; cargo drops both
/// it and this binary into the same target directory, so it is found
/// next to the running executable rather than via a fixed install path.
fn locate_interposer() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let candidate = dir.join(INTERPOSER_SONAME);
    if candidate.is_file() {
        return Some(candidate);
    }
    None
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let Some(interposer_path) = locate_interposer() else {
        log::error!(
            "could not find {INTERPOSER_SONAME} next to the forkfuzz binary; build the workspace first"
        );
        return ExitCode::from(1);
    };

    let quitting = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handlers(&quitting) {
        log::warn!("failed to install signal handlers, Ctrl-C will not stop gracefully: {e}");
    }

    let config = RunConfig {
        target: cli.binary,
        seed: cli.input,
        max_iters: cli.iterations,
        timeout_secs: cli.timeout,
        revert_after_structural_growth: false,
    };

    match orchestrator::run(config, &interposer_path, quitting) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(_e: &FuzzError) -> u8 {
    // The interposer's own exit(127) on symbol-resolution failure happens
    // inside the victim and is observed as a RunOutcome, never here;
    // every error this binary can return is a startup error.
    1
}

fn install_signal_handlers(quitting: &Arc<AtomicBool>) -> Result<(), std::io::Error> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(quitting))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(quitting))?;
    Ok(())
}
