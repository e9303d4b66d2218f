//! Engagement events and campaign metrics.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use uuid::Uuid;

use crate::campaign::{Campaign, Recipient, RecipientStatus};
use crate::contact::Contact;
use crate::db::{Database, Document, Entity, EntityKind, Identifiable, OwnerId, Partitioned};
use crate::optout::{self, Source};
use crate::Result;

/// Transparent 1x1 GIF served by the tracking pixel endpoint.
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // GIF89a
    0x01, 0x00, 0x01, 0x00, // 1x1
    0x80, 0x00, 0x00, // global color table, 2 colors
    0x00, 0x00, 0x00, 0xff, 0xff, 0xff, // black, white
    0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // graphic control, transparent
    0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x02, 0x44, 0x01, 0x00, // image data
    0x3b, // trailer
];

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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventType {
    Open,
    Unsubscribe,
}

/// Append-only engagement log entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub id: Uuid,
    #[serde(rename = "councillorId")]
    pub owner: OwnerId,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub user_agent: Option<String>,
}

impl Identifiable for TrackingEvent {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Partitioned for TrackingEvent {
    fn get_owner(&self) -> &str {
        &self.owner
    }
}

impl Entity for TrackingEvent {
    const KIND: EntityKind = EntityKind::TrackingEvent;

    fn into_document(self) -> Document {
        Document::TrackingEvent(self)
    }

    fn from_document(doc: Document) -> Option<Self> {
        match doc {
            Document::TrackingEvent(e) => Some(e),
            _ => None,
        }
    }
}

/// Appends an engagement event.
///
/// Unsubscribe events also record the opt-out for the contact. If the
/// contact can't be found the event is still kept.
pub fn record_event(
    db: &Database,
    owner: &str,
    campaign_id: Uuid,
    contact_id: Uuid,
    event_type: EventType,
    user_agent: Option<&str>,
) -> Result<TrackingEvent> {
    let event = TrackingEvent {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        campaign_id,
        contact_id,
        event_type,
        occurred_at: Utc::now(),
        user_agent: user_agent.map(str::to_string),
    };
    db.upsert(&event)?;

    if event_type == EventType::Unsubscribe {
        match db.find::<Contact>(owner, contact_id)? {
            Some(contact) => {
                optout::add(
                    db,
                    owner,
                    Some(contact.email.as_str()),
                    Some(contact.id),
                    Some(campaign_id),
                    Source::Tracking,
                )?;
            }
            None => tracing::warn!(
                %owner,
                campaign = %campaign_id,
                contact = %contact_id,
                "unsubscribe for unknown contact, opt-out not recorded"
            ),
        }
    }

    Ok(event)
}

/// Whether the owner has a partition holding the campaign. Never creates a
/// partition.
fn known_campaign(db: &Database, owner: &str, campaign_id: Uuid) -> Result<bool> {
    Ok(db.has_partition(owner)? && db.find::<Campaign>(owner, campaign_id)?.is_some())
}

/// Records an event from identifiers taken verbatim off a request.
///
/// Never fails: unparseable identifiers, unknown owners or campaigns and
/// storage errors are logged and otherwise ignored. Returns whether the
/// event was stored.
pub fn record_best_effort(
    db: &Database,
    owner: Option<&str>,
    campaign_id: Option<&str>,
    contact_id: Option<&str>,
    event_type: EventType,
    user_agent: Option<&str>,
) -> bool {
    let (owner, campaign_id, contact_id) = match (owner, campaign_id, contact_id) {
        (Some(owner), Some(campaign), Some(contact)) if !owner.is_empty() => {
            match (Uuid::parse_str(campaign), Uuid::parse_str(contact)) {
                (Ok(campaign), Ok(contact)) => (owner, campaign, contact),
                _ => {
                    tracing::debug!("ignoring {event_type} event with malformed identifiers");
                    return false;
                }
            }
        }
        _ => {
            tracing::debug!("ignoring {event_type} event with missing identifiers");
            return false;
        }
    };

    match known_campaign(db, owner, campaign_id) {
        Ok(true) => (),
        Ok(false) => {
            tracing::debug!(%owner, campaign = %campaign_id, "ignoring {event_type} event for unknown campaign");
            return false;
        }
        Err(e) => {
            tracing::warn!(%owner, campaign = %campaign_id, "failed looking up campaign: {e}");
            return false;
        }
    }

    match record_event(db, owner, campaign_id, contact_id, event_type, user_agent) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(%owner, campaign = %campaign_id, "failed recording {event_type} event: {e}");
            false
        }
    }
}

/// Engagement and delivery figures for one campaign. Always recomputed from
/// recipient rows and events.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub campaign_id: Uuid,

    pub total_targeted: usize,
    pub total_filtered_unsubscribed: usize,
    pub total_sent: usize,
    pub total_failed: usize,
    pub total_pending: usize,

    pub total_opens: usize,
    pub unique_opens: usize,
    pub total_unsubscribes: usize,
    pub unique_unsubscribes: usize,

    /// Event counts as percentages of targeted recipients. Repeated opens by
    /// the same contact all count, so the open rate can exceed 100.
    pub open_rate: f64,
    pub unsubscribe_rate: f64,
    pub delivery_rate: f64,

    /// Provider reported delivery statuses and how often each was seen.
    pub delivery_status_breakdown: FnvHashMap<String, usize>,
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.;
    }
    let pct = count as f64 / total as f64 * 100.;
    (pct * 100.).round() / 100.
}

pub fn compute_metrics(db: &Database, owner: &str, campaign_id: Uuid) -> Result<Metrics> {
    let campaign = db.get::<Campaign>(owner, campaign_id)?;
    let recipients = db.query::<Recipient>(owner, |r| r.campaign_id == campaign_id)?;
    let events = db.query::<TrackingEvent>(owner, |e| e.campaign_id == campaign_id)?;

    let mut metrics = Metrics {
        campaign_id,
        total_targeted: recipients.len(),
        total_filtered_unsubscribed: campaign.total_filtered_unsubscribed,
        ..Default::default()
    };

    for recipient in &recipients {
        match recipient.status {
            RecipientStatus::Sent => metrics.total_sent += 1,
            RecipientStatus::Failed => metrics.total_failed += 1,
            RecipientStatus::Pending => metrics.total_pending += 1,
        }
        if let Some(status) = &recipient.delivery_status {
            *metrics
                .delivery_status_breakdown
                .entry(status.clone())
                .or_insert(0) += 1;
        }
    }

    let mut openers = HashSet::new();
    let mut leavers = HashSet::new();
    for event in &events {
        match event.event_type {
            EventType::Open => {
                metrics.total_opens += 1;
                openers.insert(event.contact_id);
            }
            EventType::Unsubscribe => {
                metrics.total_unsubscribes += 1;
                leavers.insert(event.contact_id);
            }
        }
    }
    metrics.unique_opens = openers.len();
    metrics.unique_unsubscribes = leavers.len();

    metrics.open_rate = rate(metrics.total_opens, metrics.total_targeted);
    metrics.unsubscribe_rate = rate(metrics.total_unsubscribes, metrics.total_targeted);
    metrics.delivery_rate = rate(metrics.total_sent, metrics.total_targeted);

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{self, NewCampaign};
    use crate::config;
    use crate::contact;
    use crate::email::render::Renderer;
    use crate::list::{self, ReadRetry};

    async fn setup(emails: &[&str]) -> (Database, Campaign, Vec<Contact>) {
        let db = Database::temporary().unwrap();
        let l1 = list::create(&db, "cid1", "L1", "").unwrap();
        let contacts = emails
            .iter()
            .map(|e| contact::add_to_list(&db, "cid1", l1.id, e, "X", "").unwrap())
            .collect();
        let renderer = Renderer::new(&config::Tracking::default()).unwrap();
        let campaign = campaign::create(
            &db,
            &renderer,
            ReadRetry::none(),
            "cid1",
            &NewCampaign {
                subject: "News".to_string(),
                content: "Hello".to_string(),
                list_ids: vec![l1.id],
                attachments: vec![],
            },
        )
        .await
        .unwrap();
        (db, campaign, contacts)
    }

    #[test]
    fn rates_never_divide_by_zero() {
        assert_eq!(rate(0, 0), 0.);
        assert_eq!(rate(3, 0), 0.);
        assert_eq!(rate(1, 3), 33.33);
    }

    #[tokio::test]
    async fn empty_campaign_has_zero_rates() {
        let (db, campaign, _) = setup(&[]).await;
        let metrics = compute_metrics(&db, "cid1", campaign.id).unwrap();
        assert_eq!(metrics.total_targeted, 0);
        assert_eq!(metrics.open_rate, 0.);
        assert_eq!(metrics.unsubscribe_rate, 0.);
        assert!(!metrics.open_rate.is_nan());
    }

    #[tokio::test]
    async fn open_rate_counts_every_open() {
        let (db, campaign, contacts) = setup(&["a@x.com", "b@x.com"]).await;
        let a = &contacts[0];
        record_event(&db, "cid1", campaign.id, a.id, EventType::Open, Some("Mail/1.0")).unwrap();
        let metrics = compute_metrics(&db, "cid1", campaign.id).unwrap();
        assert_eq!(metrics.open_rate, 50.);

        for _ in 0..2 {
            record_event(&db, "cid1", campaign.id, a.id, EventType::Open, Some("Mail/1.0")).unwrap();
        }
        let metrics = compute_metrics(&db, "cid1", campaign.id).unwrap();
        assert_eq!(metrics.total_opens, 3);
        assert_eq!(metrics.unique_opens, 1);
        assert_eq!(metrics.open_rate, 150.);
        assert_eq!(metrics.total_pending, 2);
    }

    #[tokio::test]
    async fn unsubscribe_event_opts_contact_out() {
        let (db, campaign, contacts) = setup(&["a@x.com"]).await;
        let a = &contacts[0];
        record_event(&db, "cid1", campaign.id, a.id, EventType::Open, None).unwrap();
        record_event(&db, "cid1", campaign.id, a.id, EventType::Unsubscribe, None).unwrap();

        let metrics = compute_metrics(&db, "cid1", campaign.id).unwrap();
        assert_eq!(metrics.total_opens, 1);
        assert_eq!(metrics.unique_opens, 1);
        assert_eq!(metrics.total_unsubscribes, 1);
        assert_eq!(metrics.unsubscribe_rate, 100.);

        assert!(db.get::<Contact>("cid1", a.id).unwrap().is_unsubscribed());
        let ledger = optout::all(&db, "cid1").unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].campaign_id, Some(campaign.id));
        assert_eq!(ledger[0].source, Source::Tracking);
    }

    #[tokio::test]
    async fn unsubscribe_for_unknown_contact_keeps_event() {
        let (db, campaign, _) = setup(&[]).await;
        record_event(&db, "cid1", campaign.id, Uuid::new_v4(), EventType::Unsubscribe, None)
            .unwrap();
        assert_eq!(db.all::<TrackingEvent>("cid1").unwrap().len(), 1);
        assert!(optout::all(&db, "cid1").unwrap().is_empty());
    }

    #[test]
    fn best_effort_swallows_bad_input() {
        let db = Database::temporary().unwrap();
        assert!(!record_best_effort(&db, None, None, None, EventType::Open, None));
        assert!(!record_best_effort(&db, Some(""), Some("x"), Some("y"), EventType::Open, None));
        assert!(!record_best_effort(
            &db,
            Some("cid1"),
            Some("not-a-uuid"),
            Some(Uuid::new_v4().to_string().as_str()),
            EventType::Open,
            None
        ));
    }

    #[tokio::test]
    async fn best_effort_only_records_known_campaigns() {
        let (db, campaign, contacts) = setup(&["a@x.com"]).await;
        let partitions = db.partitions().unwrap().len();

        for i in 0..20 {
            let owner = format!("anonymous-{}", i);
            assert!(!record_best_effort(
                &db,
                Some(owner.as_str()),
                Some(campaign.id.to_string().as_str()),
                Some(contacts[0].id.to_string().as_str()),
                EventType::Open,
                None
            ));
        }
        assert!(!record_best_effort(
            &db,
            Some("cid1"),
            Some(Uuid::new_v4().to_string().as_str()),
            Some(contacts[0].id.to_string().as_str()),
            EventType::Open,
            None
        ));
        assert_eq!(db.partitions().unwrap().len(), partitions);
        assert!(db.all::<TrackingEvent>("cid1").unwrap().is_empty());

        assert!(record_best_effort(
            &db,
            Some("cid1"),
            Some(campaign.id.to_string().as_str()),
            Some(contacts[0].id.to_string().as_str()),
            EventType::Open,
            None
        ));
        assert_eq!(db.all::<TrackingEvent>("cid1").unwrap().len(), 1);
    }

    #[test]
    fn metrics_for_missing_campaign_is_not_found() {
        let db = Database::temporary().unwrap();
        assert!(compute_metrics(&db, "cid1", Uuid::new_v4())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn pixel_is_a_gif() {
        assert!(PIXEL_GIF.starts_with(b"GIF89a"));
        assert_eq!(PIXEL_GIF.last(), Some(&0x3b));
    }
}
