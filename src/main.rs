use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use channel_isolator::config::{Cli, Command};
use channel_isolator::lnd::LndTransport;
use channel_isolator::observability::init_tracing;
use channel_isolator::store::StoreError;
use channel_isolator::{cli, supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    match &args.command {
        Command::Run => {
            init_tracing(&args.config.log_level);

            let transport = Arc::new(LndTransport::new(
                args.config.node_endpoint.clone(),
                args.config.node_dir.clone(),
                args.config.network,
            ));

            match supervisor::run(args.config, transport).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "daemon failed");
                    match e.downcast_ref::<StoreError>() {
                        Some(store_err) => ExitCode::from(cli::exit_code(store_err)),
                        None => ExitCode::from(1),
                    }
                }
            }
        }
        command => ExitCode::from(cli::execute(&args.config, command)),
    }
}
