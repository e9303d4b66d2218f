//! Campaigns and their per-recipient delivery rows.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{Database, Document, Entity, EntityKind, Identifiable, OwnerId, Partitioned};
use crate::email::render::Renderer;
use crate::email::Attachment;
use crate::list::ReadRetry;
use crate::tracking::TrackingEvent;
use crate::{recipient, ErrorKind, Result};

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Queued,
    Sending,
    Sent,
    /// Dispatch ran but nothing got through.
    Failed,
}

/// Where the campaign is in its dispatch lifecycle.
///
/// ```text
/// queued ──► dispatching ──► sent | simulated | error
///   ▲                                            │
///   └──────────── (re-dispatch allowed) ◄────────┘
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DispatchState {
    #[default]
    Queued,
    Dispatching,
    Sent,
    /// Sending was disabled, nothing left the system.
    Simulated,
    Error,
}

impl DispatchState {
    /// Whether a dispatch run may claim a campaign in this state.
    pub fn is_claimable(&self) -> bool {
        matches!(self, DispatchState::Queued | DispatchState::Error)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub name: String,
    pub content_type: String,
    pub size_bytes: usize,
}

impl From<&Attachment> for AttachmentMeta {
    fn from(a: &Attachment) -> Self {
        Self {
            name: a.name.clone(),
            content_type: a.content_type.clone(),
            size_bytes: a.size_bytes(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,

    pub subject: String,
    pub raw_content: String,
    /// Canonical document with tracking placeholders still in place.
    pub processed_content: String,
    pub list_ids: Vec<Uuid>,
    pub attachments: Vec<AttachmentMeta>,

    pub status: CampaignStatus,
    pub dispatch_state: DispatchState,
    pub dispatch_error: Option<String>,
    /// When the latest dispatch run claimed the campaign.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Fixed at creation, after opt-outs were filtered.
    pub total_targeted: usize,
    pub total_filtered_unsubscribed: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,

    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Whether a dispatch run may claim the campaign at `now`.
    ///
    /// A `dispatching` claim older than `lease` belongs to a run that died
    /// without settling and is taken over.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        if self.dispatch_state.is_claimable() {
            return true;
        }
        self.dispatch_state == DispatchState::Dispatching
            && self.claimed_at.map_or(true, |at| now - at >= lease)
    }
}

impl Identifiable for Campaign {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for Campaign {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for Campaign {
    const KIND: EntityKind = EntityKind::Campaign;

    fn into_document(self) -> Document {
        Document::Campaign(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::Campaign(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecipientStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

/// One targeted contact of a campaign. Settles once, from pending to either
/// sent or failed.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub email: String,

    pub status: RecipientStatus,
    pub message_id: Option<String>,
    /// Last status reported by the provider for the message.
    pub delivery_status: Option<String>,
    pub delivery_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Recipient {
    pub fn new(owner: &str, campaign_id: Uuid, contact_id: Uuid, email: &str) -> Self {
        Self {
            id: Uuid::new_v5(&campaign_id, contact_id.as_bytes()),
            owner: owner.to_string(),
            campaign_id,
            contact_id,
            email: email.to_string(),
            status: RecipientStatus::Pending,
            message_id: None,
            delivery_status: None,
            delivery_error: None,
            sent_at: None,
        }
    }
}

impl Identifiable for Recipient {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for Recipient {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for Recipient {
    const KIND: EntityKind = EntityKind::CampaignRecipient;

    fn into_document(self) -> Document {
        Document::CampaignRecipient(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::CampaignRecipient(r) => Some(r),
            _ => None,
        }
    }
}

/// Recipient counts by status.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Summary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
}

impl Summary {
    pub fn tally(recipients: &[Recipient]) -> Self {
        recipients.iter().fold(Self::default(), |mut s, r| {
            s.total += 1;
            match r.status {
                RecipientStatus::Sent => s.sent += 1,
                RecipientStatus::Failed => s.failed += 1,
                RecipientStatus::Pending => s.pending += 1,
            }
            s
        })
    }
}

/// Input for campaign creation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCampaign {
    pub subject: String,
    pub content: String,
    pub list_ids: Vec<Uuid>,
    /// Raw payloads travel with the request only. Metadata is kept on the
    /// campaign.
    pub attachments: Vec<Attachment>,
}

impl NewCampaign {
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() || self.content.is_empty() || self.list_ids.is_empty() {
            return Err(
                ErrorKind::BadInput("subject, content, listIds required".to_string()).into(),
            );
        }
        Ok(())
    }

    /// Attachments with all fields present.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments
            .iter()
            .filter(|a| a.is_complete())
            .cloned()
            .collect()
    }
}

/// Creates the campaign along with one pending recipient row per resolved
/// contact.
///
/// The campaign and its recipients are written in a single transaction.
pub async fn create(
    db: &Database,
    renderer: &Renderer,
    retry: ReadRetry,
    owner: &str,
    new: &NewCampaign,
) -> Result<Campaign> {
    new.validate()?;

    let resolution = recipient::resolve(db, owner, &new.list_ids, retry).await?;

    let campaign = Campaign {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        subject: new.subject.trim().to_string(),
        raw_content: new.content.clone(),
        processed_content: renderer.render(&new.content),
        list_ids: new.list_ids.clone(),
        attachments: new.attachments().iter().map(AttachmentMeta::from).collect(),
        status: CampaignStatus::Queued,
        dispatch_state: DispatchState::Queued,
        dispatch_error: None,
        claimed_at: None,
        total_targeted: resolution.recipients.len(),
        total_filtered_unsubscribed: resolution.filtered_unsubscribed,
        sent_count: 0,
        failed_count: 0,
        pending_count: resolution.recipients.len(),
        created_at: Utc::now(),
        sent_at: None,
    };

    let mut docs = Vec::with_capacity(resolution.recipients.len() + 1);
    docs.push(campaign.clone().into_document());
    docs.extend(resolution.recipients.iter().map(|contact| {
        Recipient::new(owner, campaign.id, contact.id, &contact.email).into_document()
    }));
    db.upsert_all(owner, &docs)?;

    tracing::info!(
        %owner,
        campaign = %campaign.id,
        targeted = campaign.total_targeted,
        filtered = campaign.total_filtered_unsubscribed,
        "created campaign"
    );

    Ok(campaign)
}

/// All campaigns of the owner, newest first.
pub fn all(db: &Database, owner: &str) -> Result<Vec<Campaign>> {
    let mut campaigns = db.all::<Campaign>(owner)?;
    campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(campaigns)
}

/// Recipient rows of the campaign, ordered by contact id.
pub fn recipients(db: &Database, owner: &str, campaign_id: Uuid) -> Result<Vec<Recipient>> {
    let mut recipients = db.query::<Recipient>(owner, |r| r.campaign_id == campaign_id)?;
    recipients.sort_by_key(|r| r.contact_id);
    Ok(recipients)
}

/// Deletes the campaign along with its recipient rows and tracking events.
/// Returns `false` if there was no such campaign.
pub fn delete(db: &Database, owner: &str, id: Uuid) -> Result<bool> {
    if !db.delete::<Campaign>(owner, id)? {
        return Ok(false);
    }

    let recipients = db.query::<Recipient>(owner, |r| r.campaign_id == id)?;
    let events = db.query::<TrackingEvent>(owner, |e| e.campaign_id == id)?;
    let dependents = recipients
        .iter()
        .map(|r| (EntityKind::CampaignRecipient, r.id))
        .chain(events.iter().map(|e| (EntityKind::TrackingEvent, e.id)));
    for (kind, dependent) in dependents {
        if let Err(e) = db.delete_kind(owner, kind, dependent) {
            tracing::warn!(%owner, campaign = %id, "failed removing {kind} {dependent}: {e}");
        }
    }

    Ok(true)
}
