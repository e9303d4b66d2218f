use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches};
use tokio_util::sync::CancellationToken;

use civicmail::Config;

pub fn cmd() -> clap::Command {
    clap::Command::new("serve")
        .display_order(1)
        .about("Run the HTTP service")
        .arg(
            Arg::new("address")
                .long("address")
                .short('a')
                .value_name("ADDR")
                .help("Address to listen on, e.g. 0.0.0.0:8080"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(ArgAction::SetTrue)
                .help("Enable dev mode and seed demo data"),
        )
}

pub async fn run(matches: &ArgMatches, mut config: Config, cancel: CancellationToken) -> Result<()> {
    if let Some(address) = matches.get_one::<String>("address") {
        config.address = address.parse()?;
    }
    if matches.get_flag("mock") {
        config.dev.enabled = true;
        config.dev.mock = true;
    }

    tokio::spawn(async move {
        let router = civicmail::axum::Router::new();
        if let Err(e) = civicmail::axum::start(router, config).await {
            eprintln!("server failed: {}", e);
        }
        cancel.cancel();
    });

    Ok(())
}
