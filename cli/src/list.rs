use anyhow::Result;
use clap::{arg, ArgMatches};
use uuid::Uuid;

use civicmail::list::{self, ReadRetry};
use civicmail::{contact, Config, Database};

use crate::print;

pub fn cmd() -> clap::Command {
    clap::Command::new("list")
        .subcommand_required(true)
        .display_order(10)
        .about("Manage distribution lists")
        .subcommand(clap::Command::new("ls").about("Show all lists"))
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Create a new list")
                .arg(arg!(<name> "List name"))
                .arg(arg!(-d --description [description] "List description")),
        )
        .subcommand(
            clap::Command::new("rm")
                .arg_required_else_help(true)
                .about("Delete a list, keeping its contacts")
                .arg(arg!(<id> "List id")),
        )
        .subcommand(
            clap::Command::new("members")
                .arg_required_else_help(true)
                .about("Show contacts on a list")
                .arg(arg!(<id> "List id")),
        )
        .subcommand(
            clap::Command::new("add-contact")
                .arg_required_else_help(true)
                .about("Add a contact to a list")
                .arg(arg!(<id> "List id"))
                .arg(arg!(<email> "Contact email"))
                .arg(arg!(<first_name> "Contact first name"))
                .arg(arg!(<last_name> "Contact last name")),
        )
}

pub async fn run(matches: &ArgMatches, db: &Database, owner: &str, config: &Config) -> Result<()> {
    match matches.subcommand() {
        Some(("ls", _)) => print(&list::all(db, owner)?)?,
        Some(("add", m)) => {
            let name = m.get_one::<String>("name").map(String::as_str).unwrap_or_default();
            let description = m
                .get_one::<String>("description")
                .map(String::as_str)
                .unwrap_or_default();
            print(&list::create(db, owner, name, description)?)?;
        }
        Some(("rm", m)) => {
            let id = id(m)?;
            if list::delete(db, owner, id)? {
                println!("deleted list {}", id);
            } else {
                anyhow::bail!("list {} not found", id);
            }
        }
        Some(("members", m)) => {
            let contacts = list::contacts(db, owner, id(m)?, ReadRetry::from(&config.storage)).await?;
            print(&contacts)?;
        }
        Some(("add-contact", m)) => {
            let get = |name: &str| m.get_one::<String>(name).cloned().unwrap_or_default();
            let contact = contact::add_to_list(
                db,
                owner,
                id(m)?,
                &get("email"),
                &get("first_name"),
                &get("last_name"),
            )?;
            print(&contact)?;
        }
        _ => unreachable!(),
    }

    Ok(())
}

pub fn id(matches: &ArgMatches) -> Result<Uuid> {
    let id = matches
        .get_one::<String>("id")
        .ok_or_else(|| anyhow::anyhow!("missing id"))?;
    Ok(Uuid::parse_str(id)?)
}
