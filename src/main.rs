use std::path::PathBuf;
use std::process;

use clap::Parser;
use realm_protocol::config::RealmConfig;
use realm_protocol::error::{ProtocolError, Result};
use realm_protocol::transport::start_server;
use realm_protocol::utils::logging;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "realm-server", about = "Game session server", version)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn load(cli: &Cli) -> Result<RealmConfig> {
    let mut config = match &cli.config {
        Some(path) => RealmConfig::from_file(path)?,
        None => RealmConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("realm-server: {e}");
            process::exit(2);
        }
    };

    if cli.print_config {
        match toml::to_string_pretty(&config) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("realm-server: {e}"),
        }
        return;
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("realm-server: {e}");
        process::exit(2);
    }

    match start_server(config).await {
        Ok(()) => {}
        Err(e @ ProtocolError::ReactorFailure(_)) => {
            error!(error = %e, "Reactor stopped");
            process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            process::exit(2);
        }
    }
}
