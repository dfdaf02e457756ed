//! cf - Cloud Foundry command line client

mod cli;
mod commands;
mod output;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cf::config::{self, Settings};
use cf::persist::DiskPersistor;
use cf::store::ConfigStore;
use cli::{Cli, Commands};
use output::{CliError, Output};

fn init_tracing(verbose: bool, trace: bool) {
    let default = if trace {
        "cf=trace"
    } else if verbose {
        "cf=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let out = Output::new(cli.agent);

    if let Err(e) = config::load_env() {
        out.log("warn", &format!("ignoring .env file: {}", e));
    }
    let settings = Settings::from_env();
    init_tracing(cli.verbose, settings.trace);

    // If no command provided, show help
    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            eprintln!("Error: no command provided. Use --help for usage.");
            std::process::exit(1);
        }
    };
    let op = command.name();

    let store = ConfigStore::load(DiskPersistor::new(&settings.config_path), move |e| {
        out.log("warn", &format!("could not save config: {}", e));
    });
    let ctx = commands::Context::new(Arc::new(store), settings, out);

    let result = match command {
        Commands::Api { url, skip_ssl_validation, unset } => {
            commands::api::run(&ctx, url, skip_ssl_validation, unset).await
        }
        Commands::Auth { username, password, client_credentials } => {
            commands::auth::login(&ctx, &username, &password, client_credentials).await
        }
        Commands::Logout => commands::auth::logout(&ctx),
        Commands::Target { org, space } => commands::target::run(&ctx, org, space).await,
        Commands::Orgs => commands::orgs::orgs(&ctx).await,
        Commands::Spaces => commands::orgs::spaces(&ctx).await,
        Commands::Curl { path, method, data, uaa } => {
            commands::curl::run(&ctx, &path, &method, data, uaa).await
        }
    };

    if let Err(e) = result {
        out.error(CliError::from_error(&e).with_op(op));
    }
}
