use anyhow::Result;
use clap::{arg, ArgMatches};

use civicmail::optout::{self, Source};
use civicmail::Database;

use crate::print;

pub fn cmd() -> clap::Command {
    clap::Command::new("optout")
        .subcommand_required(true)
        .display_order(30)
        .about("Manage the opt-out ledger")
        .subcommand(clap::Command::new("ls").about("Show opt-outs, newest first"))
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Opt an address out of all future campaigns")
                .arg(arg!(<email> "Email address")),
        )
        .subcommand(
            clap::Command::new("rm")
                .arg_required_else_help(true)
                .about("Remove opt-outs for an address and reactivate the contact")
                .arg(arg!(<email> "Email address")),
        )
}

pub fn run(matches: &ArgMatches, db: &Database, owner: &str) -> Result<()> {
    let email = |m: &ArgMatches| m.get_one::<String>("email").cloned().unwrap_or_default();

    match matches.subcommand() {
        Some(("ls", _)) => print(&optout::all(db, owner)?)?,
        Some(("add", m)) => {
            let entry = optout::add(db, owner, Some(email(m).as_str()), None, None, Source::Manual)?;
            print(&entry)?;
        }
        Some(("rm", m)) => {
            let removed = optout::remove_by_email(db, owner, &email(m))?;
            println!("removed {} opt-out(s)", removed);
        }
        _ => unreachable!(),
    }

    Ok(())
}
