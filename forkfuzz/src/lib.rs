pub mod archiver;
pub mod cli;
pub mod csv_fuzz;
pub mod engine;
pub mod error;
pub mod format_detect;
pub mod forkserver;
pub mod json_fuzz;
pub mod mutate;
pub mod orchestrator;
pub mod util;
