use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Tree;
use uuid::Uuid;

use crate::{config, error::ErrorKind, Result};

use super::{decode, encode, key, prefix, Document, Entity, EntityKind};

const PARTITION_PREFIX: &str = "partition/";

/// Document store backed by `sled`. Each owner gets its own tree.
#[derive(Clone, Debug)]
pub struct SledDb {
    inner: sled::Db,
}

impl SledDb {
    pub fn new(config: &config::Storage) -> Result<Self> {
        let inner = if config.temporary {
            sled::Config::default().temporary(true).open()?
        } else {
            sled::Config::default().path(&config.path).open()?
        };
        Ok(Self { inner })
    }

    /// Opens a throwaway in-memory store.
    pub fn temporary() -> Result<Self> {
        Self::new(&config::Storage {
            temporary: true,
            ..Default::default()
        })
    }

    fn partition(&self, owner: &str) -> Result<Tree> {
        if owner.is_empty() {
            return Err(ErrorKind::BadInput("empty owner partition".to_string()).into());
        }
        Ok(self.inner.open_tree(format!("{}{}", PARTITION_PREFIX, owner))?)
    }

    /// Whether the owner already has a partition. Unlike every other
    /// operation this never creates one.
    pub fn has_partition(&self, owner: &str) -> Result<bool> {
        if owner.is_empty() {
            return Ok(false);
        }
        let name = format!("{}{}", PARTITION_PREFIX, owner);
        Ok(self
            .inner
            .tree_names()
            .iter()
            .any(|tree| &tree[..] == name.as_bytes()))
    }

    /// Lists owners that have a partition in the store.
    pub fn partitions(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .tree_names()
            .into_iter()
            .map(|name| String::from_utf8_lossy(&name).into_owned())
            .filter_map(|name| name.strip_prefix(PARTITION_PREFIX).map(str::to_string))
            .collect())
    }

    /// Inserts or replaces the item in its owner's partition.
    pub fn upsert<T: Entity>(&self, item: &T) -> Result<()> {
        let doc = item.clone().into_document();
        let tree = self.partition(doc.owner())?;
        tree.insert(doc.key(), encode(&doc)?)?;
        Ok(())
    }

    /// Upserts all documents of a single partition in one transaction.
    pub fn upsert_all(&self, owner: &str, docs: &[Document]) -> Result<()> {
        let mut encoded = Vec::with_capacity(docs.len());
        for doc in docs {
            if doc.owner() != owner {
                return Err(ErrorKind::DbError(format!(
                    "document {} belongs to a different partition",
                    doc.key()
                ))
                .into());
            }
            encoded.push((doc.key(), encode(doc)?));
        }

        let tree = self.partition(owner)?;
        tree.transaction(|tx| {
            for (key, value) in &encoded {
                tx.insert(key.as_bytes(), value.as_slice())?;
            }
            Ok::<_, ConflictableTransactionError<String>>(())
        })
        .map_err(transaction_error)?;
        Ok(())
    }

    /// Point read. Fails with `NotFound` if the item doesn't exist.
    pub fn get<T: Entity>(&self, owner: &str, id: Uuid) -> Result<T> {
        self.find(owner, id)?.ok_or_else(|| {
            ErrorKind::NotFound(format!("{} with id '{}'", T::KIND, id)).into()
        })
    }

    /// Point read returning `None` for missing items.
    pub fn find<T: Entity>(&self, owner: &str, id: Uuid) -> Result<Option<T>> {
        let tree = self.partition(owner)?;
        match tree.get(key(T::KIND, id))? {
            Some(bytes) => {
                let doc: Document = decode(&bytes)?;
                Ok(T::from_document(doc))
            }
            None => Ok(None),
        }
    }

    /// Point delete. Returns whether anything was removed.
    pub fn delete<T: Entity>(&self, owner: &str, id: Uuid) -> Result<bool> {
        self.delete_kind(owner, T::KIND, id)
    }

    pub fn delete_kind(&self, owner: &str, kind: EntityKind, id: Uuid) -> Result<bool> {
        let tree = self.partition(owner)?;
        Ok(tree.remove(key(kind, id))?.is_some())
    }

    /// Filtered query over all items of the given kind within the partition.
    pub fn query<T: Entity>(&self, owner: &str, filter: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let tree = self.partition(owner)?;
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix(T::KIND)) {
            let (_, bytes) = entry?;
            let doc: Document = decode(&bytes)?;
            if let Some(item) = T::from_document(doc) {
                if filter(&item) {
                    out.push(item);
                }
            }
        }
        Ok(out)
    }

    /// Returns every item of the given kind within the partition.
    pub fn all<T: Entity>(&self, owner: &str) -> Result<Vec<T>> {
        self.query(owner, |_| true)
    }

    /// Returns all documents stored in the partition, regardless of kind.
    pub fn documents(&self, owner: &str) -> Result<Vec<Document>> {
        let tree = self.partition(owner)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Transactional read-modify-write of a single item.
    ///
    /// `apply` mutates the current value and returns whether it should be
    /// written back. Returns the written value, or `None` if the item is
    /// missing or `apply` declined.
    pub fn update<T: Entity>(
        &self,
        owner: &str,
        id: Uuid,
        apply: impl Fn(&mut T) -> bool,
    ) -> Result<Option<T>> {
        let tree = self.partition(owner)?;
        let key = key(T::KIND, id);
        tree.transaction(|tx| {
            let bytes = match tx.get(key.as_bytes())? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };
            let doc: Document =
                decode(&bytes).map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
            let mut item = match T::from_document(doc) {
                Some(item) => item,
                None => return Ok(None),
            };
            if !apply(&mut item) {
                return Ok(None);
            }
            let encoded = encode(&item.clone().into_document())
                .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
            tx.insert(key.as_bytes(), encoded)?;
            Ok(Some(item))
        })
        .map_err(transaction_error)
    }
}

fn transaction_error(e: TransactionError<String>) -> crate::Error {
    match e {
        TransactionError::Abort(msg) => ErrorKind::DbError(msg).into(),
        TransactionError::Storage(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{Contact, ContactStatus};
    use crate::list::DistributionList;

    #[test]
    fn partitions_are_isolated() {
        let db = SledDb::temporary().unwrap();
        let list = DistributionList::new("cid1", "Residents", "");
        db.upsert(&list).unwrap();

        assert_eq!(db.get::<DistributionList>("cid1", list.id).unwrap().name, "Residents");
        assert!(db.find::<DistributionList>("cid2", list.id).unwrap().is_none());
        assert!(db.all::<DistributionList>("cid2").unwrap().is_empty());
        assert!(db.partitions().unwrap().contains(&"cid1".to_string()));
        assert!(db.has_partition("cid1").unwrap());
        assert!(!db.has_partition("cid3").unwrap());
        assert!(!db.partitions().unwrap().contains(&"cid3".to_string()));
    }

    #[test]
    fn kinds_do_not_leak_into_queries() {
        let db = SledDb::temporary().unwrap();
        let list = DistributionList::new("cid1", "Residents", "");
        let contact = Contact::new("cid1", "a@x.com", "A", "");
        db.upsert(&list).unwrap();
        db.upsert(&contact).unwrap();

        assert_eq!(db.all::<DistributionList>("cid1").unwrap().len(), 1);
        assert_eq!(db.all::<Contact>("cid1").unwrap().len(), 1);
        // same id looked up as another kind resolves to nothing
        assert!(db.find::<Contact>("cid1", list.id).unwrap().is_none());
        assert_eq!(db.documents("cid1").unwrap().len(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = SledDb::temporary().unwrap();
        let err = db.get::<Contact>("cid1", Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_applies_only_when_accepted() {
        let db = SledDb::temporary().unwrap();
        let contact = Contact::new("cid1", "a@x.com", "A", "");
        db.upsert(&contact).unwrap();

        let declined = db
            .update::<Contact>("cid1", contact.id, |_| false)
            .unwrap();
        assert!(declined.is_none());

        let updated = db
            .update::<Contact>("cid1", contact.id, |c| {
                c.status = ContactStatus::Unsubscribed;
                true
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ContactStatus::Unsubscribed);
        assert_eq!(
            db.get::<Contact>("cid1", contact.id).unwrap().status,
            ContactStatus::Unsubscribed
        );
    }

    #[test]
    fn upsert_all_rejects_foreign_documents() {
        let db = SledDb::temporary().unwrap();
        let ours = Contact::new("cid1", "a@x.com", "A", "");
        let theirs = Contact::new("cid2", "b@x.com", "B", "");
        let result = db.upsert_all(
            "cid1",
            &[ours.clone().into_document(), theirs.into_document()],
        );
        assert!(result.is_err());
        assert!(db.all::<Contact>("cid1").unwrap().is_empty());

        db.upsert_all("cid1", &[ours.into_document()]).unwrap();
        assert_eq!(db.all::<Contact>("cid1").unwrap().len(), 1);
    }

    #[test]
    fn delete_reports_presence() {
        let db = SledDb::temporary().unwrap();
        let contact = Contact::new("cid1", "a@x.com", "A", "");
        db.upsert(&contact).unwrap();
        assert!(db.delete::<Contact>("cid1", contact.id).unwrap());
        assert!(!db.delete::<Contact>("cid1", contact.id).unwrap());
    }
}
