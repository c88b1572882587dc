//! Dream background remover CLI tool
//!
//! Removes image backgrounds through a hosted Replicate model.

#[cfg(feature = "cli")]
use dream_bgremove::cli;

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main()
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
