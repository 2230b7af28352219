//! Evidence visual search CLI
//!
//! Command-line interface for finding objects described in free text inside
//! video evidence.

#[cfg(feature = "cli")]
use evidence_vsearch::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
