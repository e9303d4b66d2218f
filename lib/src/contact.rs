//! Contacts known to a councillor.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::campaign::Recipient;
use crate::db::{Database, Document, Entity, EntityKind, Identifiable, OwnerId, Partitioned};
use crate::list::{DistributionList, Membership};
use crate::{ErrorKind, Result};

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContactStatus {
    #[default]
    Active,
    Unsubscribed,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,

    /// Always stored trimmed and lower-cased.
    pub email: String,
    pub first_name: String,
    pub last_name: String,

    pub added_at: DateTime<Utc>,
    pub status: ContactStatus,
}

impl Contact {
    pub fn new(owner: &str, email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            email: normalize_email(email),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            added_at: Utc::now(),
            status: ContactStatus::Active,
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.status == ContactStatus::Unsubscribed
    }
}

impl Identifiable for Contact {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for Contact {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for Contact {
    const KIND: EntityKind = EntityKind::Contact;

    fn into_document(self) -> Document {
        Document::Contact(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::Contact(c) => Some(c),
            _ => None,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// All contacts of the owner, oldest first.
pub fn all(db: &Database, owner: &str) -> Result<Vec<Contact>> {
    let mut contacts = db.all::<Contact>(owner)?;
    contacts.sort_by_key(|c| c.added_at);
    Ok(contacts)
}

pub fn find_by_email(db: &Database, owner: &str, email: &str) -> Result<Option<Contact>> {
    let email = normalize_email(email);
    Ok(db
        .query::<Contact>(owner, |c| c.email == email)?
        .into_iter()
        .next())
}

/// Adds a contact to the list.
///
/// An email already known to the owner reuses the existing contact, keeping
/// its status, so a previously unsubscribed address stays unsubscribed.
pub fn add_to_list(
    db: &Database,
    owner: &str,
    list_id: Uuid,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> Result<Contact> {
    let email = normalize_email(email);
    if !email.validate_email() {
        return Err(ErrorKind::BadInput(format!("invalid email: {}", email)).into());
    }
    // the list must exist in this owner's partition
    db.get::<DistributionList>(owner, list_id)?;

    let contact = match find_by_email(db, owner, &email)? {
        Some(existing) => existing,
        None => {
            let contact = Contact::new(owner, &email, first_name, last_name);
            db.upsert(&contact)?;
            contact
        }
    };

    crate::list::add_member(db, owner, list_id, contact.id)?;

    Ok(contact)
}

/// Flips the contact's status. Returns `None` if the contact doesn't exist.
pub fn set_status(
    db: &Database,
    owner: &str,
    id: Uuid,
    status: ContactStatus,
) -> Result<Option<Contact>> {
    let updated = db.update::<Contact>(owner, id, |c| {
        if c.status == status {
            return false;
        }
        c.status = status;
        true
    })?;
    match updated {
        Some(contact) => Ok(Some(contact)),
        // unchanged or missing
        None => db.find::<Contact>(owner, id),
    }
}

/// Deletes the contact along with its memberships and campaign recipient
/// rows. Returns `false` if there was no such contact.
///
/// Dependent rows are removed on a best effort basis.
pub fn delete(db: &Database, owner: &str, id: Uuid) -> Result<bool> {
    if db.find::<Contact>(owner, id)?.is_none() {
        return Ok(false);
    }
    db.delete::<Contact>(owner, id)?;

    let memberships = db.query::<Membership>(owner, |m| m.contact_id == id)?;
    let recipients = db.query::<Recipient>(owner, |r| r.contact_id == id)?;
    let dependents = memberships
        .iter()
        .map(|m| (EntityKind::ListMembership, m.id))
        .chain(recipients.iter().map(|r| (EntityKind::CampaignRecipient, r.id)));
    for (kind, dependent) in dependents {
        if let Err(e) = db.delete_kind(owner, kind, dependent) {
            tracing::warn!(%owner, contact = %id, "failed removing {kind} {dependent}: {e}");
        }
    }

    Ok(true)
}
