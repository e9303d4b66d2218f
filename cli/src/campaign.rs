use std::sync::Arc;

use anyhow::Result;
use clap::{arg, ArgMatches};

use civicmail::campaign::{self, Summary};
use civicmail::{tracking, Config, Database, Dispatcher};

use crate::list::id;
use crate::print;

pub fn cmd() -> clap::Command {
    clap::Command::new("campaign")
        .subcommand_required(true)
        .display_order(20)
        .about("Inspect and dispatch campaigns")
        .subcommand(clap::Command::new("ls").about("Show all campaigns, newest first"))
        .subcommand(
            clap::Command::new("metrics")
                .arg_required_else_help(true)
                .about("Show engagement metrics of a campaign")
                .arg(arg!(<id> "Campaign id")),
        )
        .subcommand(
            clap::Command::new("recipients")
                .arg_required_else_help(true)
                .about("Show recipient rows of a campaign")
                .arg(arg!(<id> "Campaign id")),
        )
        .subcommand(
            clap::Command::new("dispatch")
                .arg_required_else_help(true)
                .about("Dispatch a queued or failed campaign")
                .arg(arg!(<id> "Campaign id")),
        )
}

pub async fn run(matches: &ArgMatches, db: Database, owner: &str, config: &Config) -> Result<()> {
    match matches.subcommand() {
        Some(("ls", _)) => print(&campaign::all(&db, owner)?)?,
        Some(("metrics", m)) => print(&tracking::compute_metrics(&db, owner, id(m)?)?)?,
        Some(("recipients", m)) => {
            let recipients = campaign::recipients(&db, owner, id(m)?)?;
            print(&Summary::tally(&recipients))?;
            print(&recipients)?;
        }
        Some(("dispatch", m)) => {
            civicmail::tracing::init(config)?;
            let dispatcher = Dispatcher::from_config(Arc::new(db), config);
            let campaign = dispatcher.dispatch_with(owner, id(m)?, &[]).await?;
            print(&campaign)?;
        }
        _ => unreachable!(),
    }

    Ok(())
}
