//! Module tasked with generating mock data to populate the application.

use crate::list::{self, DistributionList};
use crate::{contact, Config, Database, Result};

pub const DEMO_LIST: &str = "Demo residents";

/// Generates and saves demo data for the configured dev owner.
pub fn generate(config: &Config, db: &Database) -> Result<()> {
    demo_list(config, db)?;

    Ok(())
}

/// Seeds a distribution list with a couple of contacts. Does nothing if the
/// list already exists.
pub fn demo_list(config: &Config, db: &Database) -> Result<DistributionList> {
    let owner = config.dev.owner.as_str();

    if let Some(existing) = list::all(db, owner)?
        .into_iter()
        .find(|l| l.name == DEMO_LIST)
    {
        tracing::debug!(%owner, "demo list already present");
        return Ok(existing);
    }

    let list = list::create(db, owner, DEMO_LIST, "Seeded in dev mode")?;
    for (email, first, last) in [
        ("ada@example.org", "Ada", "Lovelace"),
        ("grace@example.org", "Grace", "Hopper"),
    ] {
        contact::add_to_list(db, owner, list.id, email, first, last)?;
    }
    tracing::info!(%owner, list = %list.id, "seeded demo list");

    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_idempotent() {
        let db = Database::temporary().unwrap();
        let config = Config::default();

        let first = demo_list(&config, &db).unwrap();
        let second = demo_list(&config, &db).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(list::all(&db, &config.dev.owner).unwrap().len(), 1);
        assert_eq!(contact::all(&db, &config.dev.owner).unwrap().len(), 2);
    }
}
