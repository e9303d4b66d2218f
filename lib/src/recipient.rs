//! Recipient resolution for a set of target lists.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::contact::Contact;
use crate::db::Database;
use crate::list::{self, ReadRetry};
use crate::optout;
use crate::Result;

#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Contacts to address, deduplicated and ordered by contact id.
    pub recipients: Vec<Contact>,
    /// Number of unique list members left out because they opted out.
    pub filtered_unsubscribed: usize,
}

/// Resolves the concrete contacts a campaign targeting `list_ids` reaches.
///
/// Members of all lists are merged so that each contact appears once, then
/// the suppression set is subtracted. Ids that don't resolve to a contact
/// are dropped silently. The order of `list_ids` doesn't matter.
pub async fn resolve(
    db: &Database,
    owner: &str,
    list_ids: &[Uuid],
    retry: ReadRetry,
) -> Result<Resolution> {
    let mut members = BTreeSet::new();
    for list_id in list_ids.iter().collect::<BTreeSet<_>>() {
        members.extend(list::member_ids(db, owner, *list_id, retry).await?);
    }

    let suppressed = optout::resolve_suppressed(db, owner)?;
    let filtered_unsubscribed = members.iter().filter(|id| suppressed.contains(*id)).count();

    let mut recipients = Vec::with_capacity(members.len() - filtered_unsubscribed);
    for id in members.into_iter().filter(|id| !suppressed.contains(id)) {
        match db.find::<Contact>(owner, id)? {
            Some(contact) => recipients.push(contact),
            None => tracing::debug!(%owner, contact = %id, "skipping dangling membership"),
        }
    }

    Ok(Resolution {
        recipients,
        filtered_unsubscribed,
    })
}
