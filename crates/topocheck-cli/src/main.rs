//! topocheck
//!
//! Verifies that an OpenStack-hosted control plane honours its server group.

use clap::Parser;

use topocheck_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.init_tracing() {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }

    let code = cli.execute().await;
    std::process::exit(code);
}
