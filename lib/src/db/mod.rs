//! Partitioned document storage.
//!
//! Every record belongs to exactly one owner partition. Within a partition
//! all entity kinds live side by side as [`Document`]s. The variant name
//! stored with each document tells its entity kind.

mod sled;

pub use self::sled::SledDb as Database;

use uuid::Uuid;

use crate::campaign::{Campaign, Recipient};
use crate::contact::Contact;
use crate::list::{DistributionList, Membership};
use crate::optout::Unsubscribe;
use crate::tracking::TrackingEvent;
use crate::Result;

/// Identifier of the councillor owning a record. Doubles as the partition
/// key: every read and write is scoped to exactly one owner.
pub type OwnerId = String;

pub trait Identifiable {
    fn get_id(&self) -> Uuid;
}

pub trait Partitioned {
    fn get_owner(&self) -> &str;
}

/// Typed view of one [`Document`] variant.
pub trait Entity: Identifiable + Partitioned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn into_document(self) -> Document;

    /// Returns `None` if the document holds a different entity kind.
    fn from_document(doc: Document) -> Option<Self>;
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum EntityKind {
    DistributionList,
    Contact,
    ListMembership,
    Campaign,
    CampaignRecipient,
    TrackingEvent,
    Unsubscribe,
}

/// Stored representation of any entity.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Document {
    DistributionList(DistributionList),
    Contact(Contact),
    ListMembership(Membership),
    Campaign(Campaign),
    CampaignRecipient(Recipient),
    TrackingEvent(TrackingEvent),
    Unsubscribe(Unsubscribe),
}

impl Document {
    pub fn kind(&self) -> EntityKind {
        match self {
            Document::DistributionList(_) => EntityKind::DistributionList,
            Document::Contact(_) => EntityKind::Contact,
            Document::ListMembership(_) => EntityKind::ListMembership,
            Document::Campaign(_) => EntityKind::Campaign,
            Document::CampaignRecipient(_) => EntityKind::CampaignRecipient,
            Document::TrackingEvent(_) => EntityKind::TrackingEvent,
            Document::Unsubscribe(_) => EntityKind::Unsubscribe,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Document::DistributionList(e) => e.get_id(),
            Document::Contact(e) => e.get_id(),
            Document::ListMembership(e) => e.get_id(),
            Document::Campaign(e) => e.get_id(),
            Document::CampaignRecipient(e) => e.get_id(),
            Document::TrackingEvent(e) => e.get_id(),
            Document::Unsubscribe(e) => e.get_id(),
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Document::DistributionList(e) => e.get_owner(),
            Document::Contact(e) => e.get_owner(),
            Document::ListMembership(e) => e.get_owner(),
            Document::Campaign(e) => e.get_owner(),
            Document::CampaignRecipient(e) => e.get_owner(),
            Document::TrackingEvent(e) => e.get_owner(),
            Document::Unsubscribe(e) => e.get_owner(),
        }
    }

    /// Storage key of the document within its partition.
    pub fn key(&self) -> String {
        key(self.kind(), self.id())
    }
}

pub(crate) fn key(kind: EntityKind, id: Uuid) -> String {
    format!("{}/{}", kind, id)
}

pub(crate) fn prefix(kind: EntityKind) -> String {
    format!("{}/", kind)
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let t: T = pot::from_slice(bytes)?;
    Ok(t)
}

pub fn encode<T: serde::Serialize>(item: &T) -> Result<Vec<u8>> {
    let bytes = pot::to_vec(item)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::optout::Source;
    use crate::tracking::EventType;

    #[test]
    fn every_kind_decodes_back() {
        let owner = "cid1";
        let campaign = Campaign {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            dispatch_error: Some("relay refused".to_string()),
            sent_at: Some(Utc::now()),
            ..Default::default()
        };
        let event = TrackingEvent {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            campaign_id: campaign.id,
            contact_id: Uuid::new_v4(),
            event_type: EventType::Open,
            occurred_at: Utc::now(),
            user_agent: None,
        };
        let optout = Unsubscribe {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            email: "a@x.com".to_string(),
            contact_id: None,
            campaign_id: Some(campaign.id),
            source: Source::Tracking,
            unsubscribed_at: Utc::now(),
        };
        let docs = vec![
            DistributionList::new(owner, "Residents", "").into_document(),
            Contact::new(owner, "a@x.com", "A", "").into_document(),
            Membership::new(owner, Uuid::new_v4(), Uuid::new_v4()).into_document(),
            Recipient::new(owner, campaign.id, Uuid::new_v4(), "a@x.com").into_document(),
            campaign.into_document(),
            event.into_document(),
            optout.into_document(),
        ];

        let mut kinds = HashSet::new();
        for doc in docs {
            let decoded: Document = decode(&encode(&doc).unwrap()).unwrap();
            assert_eq!(decoded.kind(), doc.kind());
            assert_eq!(decoded.id(), doc.id());
            assert_eq!(decoded.owner(), owner);
            kinds.insert(decoded.kind());
        }
        assert_eq!(kinds, EntityKind::iter().collect::<HashSet<_>>());
    }
}
