//! Shared plumbing between the JSON and CSV engines: dispatching one test
//! case through the forkserver, archiving bad/hang outcomes, and the
//! outer-loop termination conditions (iteration cap, wall-clock deadline,
//! `SIGINT`/`SIGTERM`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archiver;
use crate::forkserver::{ForkserverDriver, RunOutcome};
use crate::mutate::AdaptiveSelector;
use crate::util::{Rng, TimeoutTracker};

/// Populated once from CLI flags, read by the orchestrator and both engines.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: PathBuf,
    pub seed: PathBuf,
    pub max_iters: u64,
    pub timeout_secs: u64,
    /// Whether the CSV engine's `add_rows`/`add_columns` strategies should
    /// revert their growth before the next strategy runs. Off by default,
    /// preserving the accumulating behaviour of the reviewed source.
    pub revert_after_structural_growth: bool,
}

pub struct EngineContext<'a> {
    pub driver: &'a mut ForkserverDriver,
    pub rng: Rng,
    pub selector: AdaptiveSelector,
    pub config: RunConfig,
    pub iteration: u64,
    pub quitting: Arc<AtomicBool>,
    deadline: TimeoutTracker,
}

impl<'a> EngineContext<'a> {
    pub fn new(driver: &'a mut ForkserverDriver, config: RunConfig, quitting: Arc<AtomicBool>) -> Self {
        let deadline = TimeoutTracker::start(config.timeout_secs);
        Self {
            driver,
            rng: Rng::from_time(),
            selector: AdaptiveSelector::new(),
            config,
            iteration: 0,
            quitting,
            deadline,
        }
    }

    /// Whether the randomised outer loop should keep going.
    pub fn should_continue(&self) -> bool {
        self.iteration < self.config.max_iters
            && !self.deadline.expired()
            && !self.quitting.load(Ordering::Relaxed)
    }

    /// Sends one payload through the forkserver and archives a crash or
    /// hang if one occurred. Never panics; a plumbing failure is a silent
    /// per-iteration skip, per the error-handling policy.
    pub fn dispatch(&mut self, payload: &[u8]) {
        self.iteration += 1;
        let Some(outcome) = self.driver.run_iteration(payload) else {
            return;
        };
        match outcome {
            RunOutcome::Signaled(sig) => {
                archiver::save_bad(&self.config.target, payload, self.iteration, sig);
            }
            RunOutcome::TimedOut => {
                archiver::save_hang(&self.config.target, payload, self.iteration);
            }
            RunOutcome::Exited(_) => {}
        }
    }
}
