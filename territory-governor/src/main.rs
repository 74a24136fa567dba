/*!
Territory state governor service
*/

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, crate_version};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use territory_governor::core::{
    adapter::JsonLinesSource, config::GovernorConfig, governor::create_governor_from_config,
};

fn cli() -> Command {
    Command::new("territory-governor")
        .version(crate_version!())
        .about("Reconciles territory capture signals into one ownership timeline per world")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the TOML configuration file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("db-path")
                .short('p')
                .long("db-path")
                .help("Path to the territory database")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .help("Newline-delimited JSON signal feed, `-` for stdin")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("no-poll")
                .long("no-poll")
                .help("Disable map polling")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(GovernorConfig::default_path);
    let mut config = GovernorConfig::load_or_default(&config_path)?;

    if let Some(db_path) = matches.get_one::<String>("db-path") {
        config.reference.database_path = PathBuf::from(db_path);
    }
    if let Some(input) = matches.get_one::<String>("input") {
        config.stream.input = Some(PathBuf::from(input));
    }
    if matches.get_flag("no-poll") {
        config.polling.enabled = false;
    }

    info!("📊 Reference data: {}", config.reference.database_path.display());
    let mut governor = create_governor_from_config(&config).await?;

    if let Some(input) = &config.stream.input {
        let source = JsonLinesSource::from_input(input).await?;
        governor.attach_source(Box::new(source));
    }

    let mut halted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested");
                break;
            }
            halt = governor.next_halt() => match halt {
                Some(e) => {
                    error!("🚨 {}", e);
                    halted = true;
                }
                None => {
                    warn!("no world is running");
                    break;
                }
            }
        }
    }

    let report = governor.shutdown().await;
    info!("stats: {}", serde_json::to_string(&report.stats)?);

    // Exit explicitly so a pending stdin read cannot hold the runtime open
    if halted || !report.halted.is_empty() {
        error!("{} world(s) halted on invariant violations", report.halted.len());
        std::process::exit(1);
    }
    std::process::exit(0);
}
