//! Command-line surface: `-b/--binary`, `-i/--input`, `-n/--iterations`,
//! `-t/--timeout`, and derive-generated `-h/--help`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "forkfuzz", about = "Coverage-aware black-box fuzzer for 64-bit Linux executables")]
pub struct Cli {
    /// Path to the target executable.
    #[arg(short = 'b', long = "binary")]
    pub binary: PathBuf,

    /// Path to the seed input.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Maximum number of test cases to run.
    #[arg(short = 'n', long = "iterations", default_value_t = 1000)]
    pub iterations: u64,

    /// Wall-clock budget in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 60)]
    pub timeout: u64,
}
