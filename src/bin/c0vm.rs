//! CLI front end: reads an image path, runs it, maps the result to a
//! process exit code. Grounded on the argv-in/run/exit-code-out shape of a
//! bare binary entry point the way the rest of this retrieval pack's CLI
//! tools do it, wired up with `clap` + `env_logger` the way the corpus wires
//! up diagnostics.

use std::process::ExitCode;

use clap::Parser;
use log::error;

use c0vm::{load_image, run, NativeRegistry};

/// Run a compiled C0 bytecode image.
#[derive(Parser)]
#[command(name = "c0vm", version, about)]
struct Args {
    /// Path to the compiled image file.
    image: std::path::PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let bytes = match std::fs::read(&args.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("c0vm: could not read {}: {e}", args.image.display());
            return ExitCode::from(106);
        }
    };

    let natives = NativeRegistry::standard();
    let image = match load_image(&bytes, &natives) {
        Ok(image) => image,
        Err(e) => {
            error!("failed to load image: {e}");
            eprintln!("c0vm: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    match run(&image, &natives) {
        Ok(exit_value) => ExitCode::from(exit_value.rem_euclid(256) as u8),
        Err(e) => {
            error!("trap: {e}");
            eprintln!("c0vm: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
