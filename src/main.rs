//! secretops - declarative secret-operations engine.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use secretops::{cli, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    if let Err(e) = setup_tracing(&args.log_level, args.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e.render());
            eprintln!("{}", e.render());
            ExitCode::FAILURE
        }
    }
}
