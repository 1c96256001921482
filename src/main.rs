mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::EnvFilter;

use applybox::config::Config;
use applybox::crypto::CredentialCipher;

// Exit codes: 0 normal shutdown, 1 startup failure, 2 unrecoverable runtime
const EXIT_STARTUP: i32 = 1;
const EXIT_RUNTIME: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::GenKey = cli.command {
        println!("{}", CredentialCipher::generate_key());
        return;
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Configuration failed to load");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let result = match cli.command {
        Commands::Dispatcher => applybox::api::run(config).await,
        Commands::Worker => applybox::worker::run_process(config).await,
        Commands::GenKey => unreachable!("handled before config load"),
    };

    if let Err(err) = result {
        error!(error = %err, "Unrecoverable runtime error");
        std::process::exit(EXIT_RUNTIME);
    }
}
