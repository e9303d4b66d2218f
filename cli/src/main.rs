mod campaign;
mod list;
mod optout;
mod serve;

use std::str::FromStr;
use std::time::Duration;

use clap::{Arg, ArgMatches, Command};
use civicmail::{config, Config, Database};
use tokio_util::sync::CancellationToken;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // Config file in the working directory is picked up if present. Another
    // location can be provided through the `--config` argument.
    let mut config: Config = config::load().unwrap_or_default();

    let matches = cmd().get_matches();

    // Load the proper config if proper argument is provided.
    if let Some(config_path) = matches.get_one::<String>("config") {
        config = config::load_from(config_path)?;
    }
    if let Some(level) = matches.get_one::<String>("verbosity") {
        config.tracing.level = civicmail::tracing::Level::from_str(level)?;
    }

    match matches.subcommand() {
        Some(("serve", m)) => serve::run(m, config, cancel.clone()).await?,
        Some((name, m)) => {
            // Operator commands work on the store directly, the service
            // must not be running against the same path.
            let db = Database::new(&config.storage)?;
            let owner = owner(&matches, &config);
            match name {
                "list" => list::run(m, &db, &owner, &config).await?,
                "campaign" => campaign::run(m, db, &owner, &config).await?,
                "optout" => optout::run(m, &db, &owner)?,
                _ => unreachable!(),
            }
            return Ok(());
        }
        None => unreachable!(),
    }

    // Wait for either ctrl_c signal or message from within server task(s)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Initiating graceful shutdown...");
            cancel.cancel();
        },
        _ = cancel.cancelled() => {},
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    Ok(())
}

/// Owner partition targeted by operator commands.
fn owner(matches: &ArgMatches, config: &Config) -> String {
    matches
        .get_one::<String>("owner")
        .cloned()
        .unwrap_or_else(|| config.auth.fallback_owner.clone())
}

pub fn cmd() -> Command {
    Command::new("civicmail")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .author(AUTHORS)
        .about("Email campaigns for councillors.")
        .subcommand(serve::cmd())
        .subcommand(list::cmd())
        .subcommand(campaign::cmd())
        .subcommand(optout::cmd())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("owner")
                .long("owner")
                .short('o')
                .value_name("ID")
                .global(true)
                .help("Owner partition to operate on, defaults to the fallback owner"),
        )
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .short('v')
                .display_order(100)
                .value_name("level")
                .value_parser(["trace", "debug", "info", "warn", "error", "none"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}

/// Prints the value as pretty json.
pub fn print<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
