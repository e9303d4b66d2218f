//! Distribution lists and their memberships.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config;
use crate::contact::Contact;
use crate::db::{Database, Document, Entity, EntityKind, Identifiable, OwnerId, Partitioned};
use crate::{ErrorKind, Result};

/// Named grouping of contacts belonging to one owner.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionList {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,

    pub name: String,
    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl DistributionList {
    pub fn new(owner: &str, name: &str, description: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Identifiable for DistributionList {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for DistributionList {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for DistributionList {
    const KIND: EntityKind = EntityKind::DistributionList;

    fn into_document(self) -> Document {
        Document::DistributionList(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::DistributionList(l) => Some(l),
            _ => None,
        }
    }
}

/// Links a contact to a list. At most one per (list, contact) pair.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,
    pub list_id: Uuid,
    pub contact_id: Uuid,
}

impl Membership {
    /// Memberships are keyed by the pair they link so the same contact can't
    /// be added to a list twice.
    pub fn new(owner: &str, list_id: Uuid, contact_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v5(&list_id, contact_id.as_bytes()),
            owner: owner.to_string(),
            list_id,
            contact_id,
        }
    }
}

impl Identifiable for Membership {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for Membership {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for Membership {
    const KIND: EntityKind = EntityKind::ListMembership;

    fn into_document(self) -> Document {
        Document::ListMembership(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::ListMembership(m) => Some(m),
            _ => None,
        }
    }
}

/// Retry schedule for membership reads that come back empty.
#[derive(Copy, Clone, Debug)]
pub struct ReadRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl ReadRetry {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl From<&config::Storage> for ReadRetry {
    fn from(storage: &config::Storage) -> Self {
        Self {
            attempts: storage.read_attempts.max(1),
            backoff: Duration::from_millis(storage.read_backoff_ms),
        }
    }
}

pub fn create(db: &Database, owner: &str, name: &str, description: &str) -> Result<DistributionList> {
    if name.trim().is_empty() {
        return Err(ErrorKind::BadInput("list name must not be empty".to_string()).into());
    }
    let list = DistributionList::new(owner, name, description);
    db.upsert(&list)?;
    Ok(list)
}

/// All lists of the owner, oldest first.
pub fn all(db: &Database, owner: &str) -> Result<Vec<DistributionList>> {
    let mut lists = db.all::<DistributionList>(owner)?;
    lists.sort_by_key(|l| l.created_at);
    Ok(lists)
}

/// Deletes the list and its memberships. Contacts themselves are kept.
/// Returns `false` if there was no such list.
pub fn delete(db: &Database, owner: &str, id: Uuid) -> Result<bool> {
    if !db.delete::<DistributionList>(owner, id)? {
        return Ok(false);
    }
    for membership in db.query::<Membership>(owner, |m| m.list_id == id)? {
        if let Err(e) = db.delete::<Membership>(owner, membership.id) {
            tracing::warn!(%owner, list = %id, "failed removing membership {}: {e}", membership.id);
        }
    }
    Ok(true)
}

/// Idempotently links the contact to the list.
pub fn add_member(db: &Database, owner: &str, list_id: Uuid, contact_id: Uuid) -> Result<Membership> {
    let membership = Membership::new(owner, list_id, contact_id);
    if let Some(existing) = db.find::<Membership>(owner, membership.id)? {
        return Ok(existing);
    }
    db.upsert(&membership)?;
    Ok(membership)
}

/// Contact ids linked to the list.
///
/// An empty read is retried following `retry`, with the delay doubling
/// between attempts. An empty list after the final attempt is a valid
/// answer, not an error.
pub async fn member_ids(
    db: &Database,
    owner: &str,
    list_id: Uuid,
    retry: ReadRetry,
) -> Result<Vec<Uuid>> {
    let mut delay = retry.backoff;
    let mut attempt = 1;
    loop {
        let ids = db
            .query::<Membership>(owner, |m| m.list_id == list_id)?
            .into_iter()
            .map(|m| m.contact_id)
            .collect::<Vec<_>>();
        if !ids.is_empty() || attempt >= retry.attempts {
            return Ok(ids);
        }
        tracing::debug!(%owner, list = %list_id, attempt, "no members yet, retrying in {:?}", delay);
        tokio::time::sleep(delay).await;
        delay *= 2;
        attempt += 1;
    }
}

/// Contacts linked to the list, ordered by email. Dangling memberships are
/// skipped.
pub async fn contacts(
    db: &Database,
    owner: &str,
    list_id: Uuid,
    retry: ReadRetry,
) -> Result<Vec<Contact>> {
    db.get::<DistributionList>(owner, list_id)?;
    let mut contacts = Vec::new();
    for id in member_ids(db, owner, list_id, retry).await? {
        if let Some(contact) = db.find::<Contact>(owner, id)? {
            contacts.push(contact);
        }
    }
    contacts.sort_by(|a, b| a.email.cmp(&b.email));
    Ok(contacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact;

    #[test]
    fn create_requires_name() {
        let db = Database::temporary().unwrap();
        assert!(create(&db, "cid1", "  ", "").is_err());
        let list = create(&db, "cid1", " Residents ", "").unwrap();
        assert_eq!(list.name, "Residents");
        assert_eq!(all(&db, "cid1").unwrap().len(), 1);
    }

    #[test]
    fn delete_keeps_contacts() {
        let db = Database::temporary().unwrap();
        let list = create(&db, "cid1", "Residents", "").unwrap();
        contact::add_to_list(&db, "cid1", list.id, "a@x.com", "A", "").unwrap();

        assert!(delete(&db, "cid1", list.id).unwrap());
        assert!(db.all::<Membership>("cid1").unwrap().is_empty());
        assert_eq!(contact::all(&db, "cid1").unwrap().len(), 1);
        assert!(!delete(&db, "cid1", list.id).unwrap());
    }

    #[tokio::test]
    async fn empty_list_resolves_after_retries() {
        let db = Database::temporary().unwrap();
        let list = create(&db, "cid1", "Residents", "").unwrap();
        let retry = ReadRetry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        assert!(contacts(&db, "cid1", list.id, retry).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn contacts_are_scoped_to_list() {
        let db = Database::temporary().unwrap();
        let residents = create(&db, "cid1", "Residents", "").unwrap();
        let volunteers = create(&db, "cid1", "Volunteers", "").unwrap();
        contact::add_to_list(&db, "cid1", residents.id, "b@x.com", "B", "").unwrap();
        contact::add_to_list(&db, "cid1", residents.id, "a@x.com", "A", "").unwrap();
        contact::add_to_list(&db, "cid1", volunteers.id, "c@x.com", "C", "").unwrap();

        let found = contacts(&db, "cid1", residents.id, ReadRetry::none())
            .await
            .unwrap();
        let emails = found.iter().map(|c| c.email.as_str()).collect::<Vec<_>>();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);

        let err = contacts(&db, "cid2", residents.id, ReadRetry::none())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
