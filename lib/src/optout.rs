//! Opt-out ledger and suppression.
//!
//! A contact is suppressed if its status says so or if the ledger holds an
//! entry for it, either by contact id or by address. Both sources are
//! consulted every time a recipient set is computed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::contact::{self, normalize_email, Contact, ContactStatus};
use crate::db::{Database, Document, Entity, EntityKind, Identifiable, OwnerId, Partitioned};
use crate::{ErrorKind, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    /// Entered by the owner.
    #[default]
    Manual,
    /// Recorded from an unsubscribe link or tracking call.
    Tracking,
}

/// Opt-out ledger entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unsubscribe {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,

    pub email: String,
    /// Missing when the address wasn't known as a contact at the time.
    pub contact_id: Option<Uuid>,
    /// Campaign the opt-out came through, if any.
    pub campaign_id: Option<Uuid>,

    pub source: Source,
    pub unsubscribed_at: DateTime<Utc>,
}

impl Identifiable for Unsubscribe {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for Unsubscribe {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for Unsubscribe {
    const KIND: EntityKind = EntityKind::Unsubscribe;

    fn into_document(self) -> Document {
        Document::Unsubscribe(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::Unsubscribe(u) => Some(u),
            _ => None,
        }
    }
}

/// Deterministic entry id, so repeated opt-outs of the same contact or
/// address land on the same record.
pub fn entry_id(owner: &str, contact_id: Option<Uuid>, email: &str) -> Uuid {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, owner.as_bytes());
    match contact_id {
        Some(id) => Uuid::new_v5(&namespace, id.as_bytes()),
        None => Uuid::new_v5(&namespace, email.as_bytes()),
    }
}

/// Computes the set of contact ids that must never receive a campaign.
///
/// Union of contacts with unsubscribed status, contact ids present in the
/// ledger and contacts whose address appears in the ledger.
pub fn resolve_suppressed(db: &Database, owner: &str) -> Result<HashSet<Uuid>> {
    let ledger = db.all::<Unsubscribe>(owner)?;
    let emails = ledger
        .iter()
        .map(|u| u.email.as_str())
        .collect::<HashSet<_>>();

    let mut suppressed = ledger
        .iter()
        .filter_map(|u| u.contact_id)
        .collect::<HashSet<_>>();
    for contact in db.all::<Contact>(owner)? {
        if contact.is_unsubscribed() || emails.contains(contact.email.as_str()) {
            suppressed.insert(contact.id);
        }
    }

    Ok(suppressed)
}

/// Records an opt-out and flips the matching contact to unsubscribed.
///
/// The contact is looked up by `contact_id` first, then by address.
/// Repeating the call for the same contact or address returns the existing
/// entry.
pub fn add(
    db: &Database,
    owner: &str,
    email: Option<&str>,
    contact_id: Option<Uuid>,
    campaign_id: Option<Uuid>,
    source: Source,
) -> Result<Unsubscribe> {
    let mut contact = match contact_id {
        Some(id) => db.find::<Contact>(owner, id)?,
        None => None,
    };
    if contact.is_none() {
        if let Some(email) = email {
            contact = contact::find_by_email(db, owner, email)?;
        }
    }

    let email = match (&contact, email) {
        (Some(c), _) => c.email.clone(),
        (None, Some(e)) => normalize_email(e),
        (None, None) => {
            return Err(ErrorKind::BadInput(
                "either an email or a known contact id is required".to_string(),
            )
            .into())
        }
    };
    if !email.validate_email() {
        return Err(ErrorKind::BadInput(format!("invalid email: {}", email)).into());
    }

    let contact_id = contact.as_ref().map(|c| c.id);
    if let Some(contact) = &contact {
        contact::set_status(db, owner, contact.id, ContactStatus::Unsubscribed)?;
    }

    let id = entry_id(owner, contact_id, &email);
    if let Some(existing) = db.find::<Unsubscribe>(owner, id)? {
        return Ok(existing);
    }
    if let Some(existing) = db
        .query::<Unsubscribe>(owner, |u| u.email == email)?
        .into_iter()
        .next()
    {
        return Ok(existing);
    }

    let entry = Unsubscribe {
        id,
        owner: owner.to_string(),
        email,
        contact_id,
        campaign_id,
        source,
        unsubscribed_at: Utc::now(),
    };
    db.upsert(&entry)?;
    tracing::info!(%owner, email = %entry.email, source = %entry.source, "recorded opt-out");

    Ok(entry)
}

/// Ledger entries of the owner, newest first.
pub fn all(db: &Database, owner: &str) -> Result<Vec<Unsubscribe>> {
    let mut entries = db.all::<Unsubscribe>(owner)?;
    entries.sort_by(|a, b| b.unsubscribed_at.cmp(&a.unsubscribed_at));
    Ok(entries)
}

/// Removes the entry and reactivates the contact it points to. Returns
/// `false` if there was no such entry.
pub fn remove(db: &Database, owner: &str, id: Uuid) -> Result<bool> {
    let entry = match db.find::<Unsubscribe>(owner, id)? {
        Some(entry) => entry,
        None => return Ok(false),
    };
    db.delete::<Unsubscribe>(owner, id)?;
    reinstate(db, owner, &entry)?;
    Ok(true)
}

/// Removes every entry for the address and reactivates matching contacts.
/// Returns the number of removed entries.
pub fn remove_by_email(db: &Database, owner: &str, email: &str) -> Result<usize> {
    let email = normalize_email(email);
    let entries = db.query::<Unsubscribe>(owner, |u| u.email == email)?;
    for entry in &entries {
        db.delete::<Unsubscribe>(owner, entry.id)?;
        reinstate(db, owner, entry)?;
    }
    if let Some(contact) = contact::find_by_email(db, owner, &email)? {
        contact::set_status(db, owner, contact.id, ContactStatus::Active)?;
    }
    Ok(entries.len())
}

fn reinstate(db: &Database, owner: &str, entry: &Unsubscribe) -> Result<()> {
    let contact = match entry.contact_id {
        Some(id) => db.find::<Contact>(owner, id)?,
        None => contact::find_by_email(db, owner, &entry.email)?,
    };
    if let Some(contact) = contact {
        contact::set_status(db, owner, contact.id, ContactStatus::Active)?;
    }
    Ok(())
}
