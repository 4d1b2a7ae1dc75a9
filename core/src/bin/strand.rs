/// Strand CLI
///
/// Prints the effective debugger configuration and runs the reference-engine
/// demos (hazard, fork, stop, slow motion).
use strand_core::{cli, logging};

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
