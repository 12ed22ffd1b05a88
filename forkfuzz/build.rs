//! Compiles the vulnerable C fixture used by the integration test into an
//! executable under `OUT_DIR`. Not required for the library or binary
//! crate; only the fixture-driven integration test reads `CRASH_TARGET_PATH`.

use std::env;
use std::path::Path;

fn main() {
    let src = "tests/fixtures/crash_target.c";
    println!("cargo:rerun-if-changed={src}");

    let out_dir = env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("crash_target");

    let compiler = cc::Build::new().opt_level(0).get_compiler();
    let status = compiler
        .to_command()
        .arg(src)
        .arg("-o")
        .arg(&dest)
        .status();

    match status {
        Ok(s) if s.success() => {
            println!("cargo:rustc-env=CRASH_TARGET_PATH={}", dest.display());
        }
        _ => {
            println!(
                "cargo:warning=could not compile {src}; the crash_target integration test will be skipped"
            );
        }
    }
}
