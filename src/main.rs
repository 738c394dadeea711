//! graphkit CLI binary entry point.

use clap::Parser;
use graphkit::cli::{AuthCommands, Cli, Commands};
use graphkit::config::GraphConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = GraphConfig::from_env();

    let result = match cli.command {
        Commands::Auth(auth_args) => match auth_args.command {
            AuthCommands::Login => graphkit::cli::auth::handle_login(&config).await,
            AuthCommands::List => graphkit::cli::auth::handle_list(&config).await,
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
