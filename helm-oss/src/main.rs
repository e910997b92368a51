//! `helm oss` plugin binary

use clap::Parser;
use helm_oss::cli::{run, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_guard = helm_oss_logging::init_subscriber(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        drop(log_guard);
        std::process::exit(1);
    }
}
