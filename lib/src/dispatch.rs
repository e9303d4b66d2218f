//! Campaign dispatch.
//!
//! A dispatch run first claims the campaign by moving its dispatch state to
//! `dispatching` inside a storage transaction. Only campaigns that are
//! `queued` or in `error` can be claimed, so two runs for the same campaign
//! never overlap.
//!
//! A claim left behind by a run that never settled expires after
//! `lease_secs`. The run itself is detached from the caller, so dropping the
//! caller's future doesn't abort it.
//!
//! Once claimed, pending recipients are sent either one at a time or in
//! successive waves of `batch_size` recipients, with a single semaphore
//! capping the number of in-flight sends for the whole run. Every recipient
//! outcome is persisted before the campaign aggregates, which are written
//! last.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus, DispatchState, Recipient, RecipientStatus, Summary};
use crate::config;
use crate::db::Database;
use crate::email::render::{self, Personalization};
use crate::email::{Attachment, OutgoingEmail, Transport};
use crate::{Error, ErrorKind, Result};

/// Outcome of a single send attempt.
#[derive(Clone, Debug)]
enum Outcome {
    Sent {
        message_id: String,
        delivery_status: Option<String>,
    },
    Failed {
        error: Option<String>,
    },
    /// Nothing was attempted, the recipient has no address.
    Skipped,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Database>,
    config: config::Dispatch,
    sender: String,
    /// Holds the reason if the configured transport couldn't be built.
    /// Dispatching with sending enabled fails with it in that case.
    transport: std::result::Result<Arc<dyn Transport>, String>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        config: config::Dispatch,
        sender: String,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            db,
            config,
            sender,
            transport: transport.ok_or_else(|| "email transport not configured".to_string()),
        }
    }

    /// Builds the dispatcher from application config. A transport that
    /// can't be built is logged and its error kept for dispatch runs.
    pub fn from_config(db: Arc<Database>, config: &crate::Config) -> Self {
        let mut dispatcher = Self::new(db, config.dispatch.clone(), config.email.sender.clone(), None);
        dispatcher.transport = crate::email::from_config(&config.email).map_err(|e| {
            if config.dispatch.enable_send {
                tracing::warn!("email transport unavailable: {e}");
            }
            match e.kind {
                ErrorKind::Misconfigured(reason) => reason,
                kind => kind.to_string(),
            }
        });
        dispatcher
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Ok(transport);
        self
    }

    fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.config.lease_secs))
    }

    pub fn config(&self) -> &config::Dispatch {
        &self.config
    }

    pub async fn dispatch(&self, owner: &str, campaign: &Campaign) -> Result<Campaign> {
        self.dispatch_with(owner, campaign.id, &[]).await
    }

    /// Dispatches the campaign, sending `attachments` along with every
    /// message.
    ///
    /// Fails only if the campaign doesn't exist or is already claimed by
    /// another run. Any other failure is recorded on the returned campaign
    /// as the `error` dispatch state.
    pub async fn dispatch_with(
        &self,
        owner: &str,
        campaign_id: Uuid,
        attachments: &[Attachment],
    ) -> Result<Campaign> {
        let campaign = self.claim(owner, campaign_id)?;

        let dispatcher = self.clone();
        let owner = owner.to_string();
        let attachments = attachments.to_vec();
        tokio::spawn(async move { dispatcher.complete(&owner, campaign, &attachments).await })
            .await
            .map_err(|e| ErrorKind::Other(format!("dispatch task failed: {e}")))?
    }

    /// Runs the claimed campaign, recording any failure on it.
    async fn complete(&self, owner: &str, campaign: Campaign, attachments: &[Attachment]) -> Result<Campaign> {
        let campaign_id = campaign.id;
        match self.run(owner, campaign, attachments).await {
            Ok(campaign) => Ok(campaign),
            Err(e) => {
                tracing::error!(%owner, campaign = %campaign_id, "dispatch failed: {}", e.kind);
                let message = e.kind.to_string();
                let failed = self.db.update::<Campaign>(owner, campaign_id, |c| {
                    c.dispatch_state = DispatchState::Error;
                    c.dispatch_error = Some(message.clone());
                    c.status = CampaignStatus::Failed;
                    true
                })?;
                failed.ok_or(e)
            }
        }
    }

    /// Moves the campaign to `dispatching` if no live run holds it.
    fn claim(&self, owner: &str, campaign_id: Uuid) -> Result<Campaign> {
        let now = Utc::now();
        let lease = self.lease();
        let claimed = self.db.update::<Campaign>(owner, campaign_id, |c| {
            if !c.is_claimable(now, lease) {
                return false;
            }
            c.dispatch_state = DispatchState::Dispatching;
            c.dispatch_error = None;
            c.claimed_at = Some(now);
            c.status = CampaignStatus::Sending;
            true
        })?;
        if let Some(campaign) = claimed {
            return Ok(campaign);
        }

        let current = self.db.get::<Campaign>(owner, campaign_id)?;
        Err(Error::new_with(
            ErrorKind::DispatchConflict(format!(
                "campaign {} is {}",
                campaign_id, current.dispatch_state
            )),
            owner,
        ))
    }

    async fn run(&self, owner: &str, campaign: Campaign, attachments: &[Attachment]) -> Result<Campaign> {
        if !self.config.enable_send {
            return self.simulate(owner, &campaign);
        }

        if self.sender.trim().is_empty() {
            return Err(ErrorKind::Misconfigured("missing sender address".to_string()).into());
        }
        let transport = self.transport.clone().map_err(ErrorKind::Misconfigured)?;

        let mut recipients = crate::campaign::recipients(&self.db, owner, campaign.id)?;
        let pending = recipients
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == RecipientStatus::Pending)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();

        tracing::info!(
            %owner,
            campaign = %campaign.id,
            pending = pending.len(),
            transport = transport.name(),
            concurrent = self.config.concurrent,
            "dispatching campaign"
        );

        let outcomes = if self.config.concurrent {
            self.send_concurrent(&transport, owner, &campaign, &recipients, &pending, attachments)
                .await
        } else {
            let mut outcomes = Vec::with_capacity(pending.len());
            for idx in &pending {
                outcomes.push(
                    self.send_one(&transport, owner, &campaign, &recipients[*idx], attachments)
                        .await,
                );
            }
            outcomes
        };

        // recipient rows first
        for (idx, outcome) in pending.iter().zip(outcomes) {
            let recipient = &mut recipients[*idx];
            if !settle(recipient, outcome) {
                continue;
            }
            if let Err(e) = self.db.upsert(&*recipient) {
                tracing::error!(%owner, recipient = %recipient.id, "failed persisting outcome: {e}");
            }
        }

        // campaign aggregates last
        let summary = Summary::tally(&recipients);
        let updated = self.db.update::<Campaign>(owner, campaign.id, |c| {
            c.sent_count = summary.sent;
            c.failed_count = summary.failed;
            c.pending_count = summary.pending;
            c.dispatch_state = DispatchState::Sent;
            c.status = if summary.sent == 0 && summary.failed > 0 {
                CampaignStatus::Failed
            } else {
                CampaignStatus::Sent
            };
            c.sent_at = Some(Utc::now());
            true
        })?;

        tracing::info!(
            %owner,
            campaign = %campaign.id,
            sent = summary.sent,
            failed = summary.failed,
            pending = summary.pending,
            "campaign dispatched"
        );

        updated.ok_or_else(|| ErrorKind::NotFound(format!("campaign {}", campaign.id)).into())
    }

    /// Marks the campaign as dispatched without sending anything.
    fn simulate(&self, owner: &str, campaign: &Campaign) -> Result<Campaign> {
        tracing::info!(%owner, campaign = %campaign.id, "sending disabled, simulating dispatch");
        let updated = self.db.update::<Campaign>(owner, campaign.id, |c| {
            c.dispatch_state = DispatchState::Simulated;
            c.status = CampaignStatus::Sent;
            c.pending_count = c.total_targeted;
            c.sent_at = Some(Utc::now());
            true
        })?;
        updated.ok_or_else(|| ErrorKind::NotFound(format!("campaign {}", campaign.id)).into())
    }

    async fn send_concurrent(
        &self,
        transport: &Arc<dyn Transport>,
        owner: &str,
        campaign: &Campaign,
        recipients: &[Recipient],
        pending: &[usize],
        attachments: &[Attachment],
    ) -> Vec<Outcome> {
        let semaphore = Semaphore::new(self.config.max_concurrent.max(1));
        let mut outcomes = Vec::with_capacity(pending.len());

        for wave in pending.chunks(self.config.batch_size.max(1)) {
            let sends = wave.iter().map(|idx| {
                let semaphore = &semaphore;
                async move {
                    // the semaphore is never closed
                    let _permit = semaphore.acquire().await.ok();
                    self.send_one(transport, owner, campaign, &recipients[*idx], attachments)
                        .await
                }
            });
            outcomes.extend(join_all(sends).await);
        }

        outcomes
    }

    async fn send_one(
        &self,
        transport: &Arc<dyn Transport>,
        owner: &str,
        campaign: &Campaign,
        recipient: &Recipient,
        attachments: &[Attachment],
    ) -> Outcome {
        if recipient.email.trim().is_empty() {
            tracing::debug!(recipient = %recipient.id, "skipping recipient without address");
            return Outcome::Skipped;
        }

        let html = Personalization::new(owner, campaign.id, recipient.contact_id)
            .apply(&campaign.processed_content);
        let email = OutgoingEmail {
            sender: self.sender.clone(),
            to: recipient.email.clone(),
            subject: campaign.subject.clone(),
            plain_text: render::plain_text(&campaign.raw_content, &html),
            html,
            attachments: attachments.to_vec(),
        };

        match transport.send(&email).await {
            Ok(message_id) => {
                let delivery_status = match transport.status(&message_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(email = %recipient.email, %message_id, "status probe failed: {e}");
                        None
                    }
                };
                if self.config.diagnostics {
                    tracing::info!(
                        email = %recipient.email,
                        campaign = %campaign.id,
                        %message_id,
                        delivery_status = delivery_status.as_deref().unwrap_or("-"),
                        "sent"
                    );
                }
                Outcome::Sent {
                    message_id,
                    delivery_status,
                }
            }
            Err(e) => {
                tracing::error!(email = %recipient.email, campaign = %campaign.id, "send failed: {}", e.kind);
                Outcome::Failed {
                    error: self.config.diagnostics.then(|| e.kind.to_string()),
                }
            }
        }
    }
}

/// Applies the outcome to the recipient. Returns whether anything changed.
fn settle(recipient: &mut Recipient, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Sent {
            message_id,
            delivery_status,
        } => {
            recipient.status = RecipientStatus::Sent;
            recipient.message_id = Some(message_id);
            recipient.delivery_status = delivery_status;
            recipient.delivery_error = None;
            recipient.sent_at = Some(Utc::now());
            true
        }
        Outcome::Failed { error } => {
            recipient.status = RecipientStatus::Failed;
            recipient.delivery_error = error;
            true
        }
        Outcome::Skipped => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::campaign::{self, NewCampaign};
    use crate::contact;
    use crate::email::render::Renderer;
    use crate::email::MemoryTransport;
    use crate::list::{self, ReadRetry};

    async fn setup(db: &Database, count: usize) -> Campaign {
        let l1 = list::create(db, "cid1", "L1", "").unwrap();
        for i in 0..count {
            contact::add_to_list(db, "cid1", l1.id, &format!("c{}@x.com", i), "C", "").unwrap();
        }
        let renderer = Renderer::new(&config::Tracking::default()).unwrap();
        campaign::create(
            db,
            &renderer,
            ReadRetry::none(),
            "cid1",
            &NewCampaign {
                subject: "News".to_string(),
                content: "<p>Hello</p>".to_string(),
                list_ids: vec![l1.id],
                attachments: vec![],
            },
        )
        .await
        .unwrap()
    }

    fn dispatcher(db: Arc<Database>, config: config::Dispatch, transport: Arc<MemoryTransport>) -> Dispatcher {
        Dispatcher::new(db, config, "news@council.example".to_string(), Some(transport))
    }

    fn sending() -> config::Dispatch {
        config::Dispatch {
            enable_send: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_sending_simulates() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let transport = Arc::new(MemoryTransport::new());

        let updated = dispatcher(db.clone(), config::Dispatch::default(), transport.clone())
            .dispatch("cid1", &campaign)
            .await
            .unwrap();

        assert_eq!(updated.dispatch_state, DispatchState::Simulated);
        assert_eq!(updated.pending_count, 1);
        assert!(updated.sent_at.is_some());
        assert!(transport.sent().is_empty());
        let rows = campaign::recipients(&db, "cid1", campaign.id).unwrap();
        assert_eq!(rows[0].status, RecipientStatus::Pending);
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_run() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 3).await;
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_for("c1@x.com");

        let updated = dispatcher(db.clone(), sending(), transport.clone())
            .dispatch("cid1", &campaign)
            .await
            .unwrap();

        assert_eq!(updated.dispatch_state, DispatchState::Sent);
        assert_eq!(updated.sent_count, 2);
        assert_eq!(updated.failed_count, 1);
        assert_eq!(updated.pending_count, 0);
        assert_eq!(transport.sent().len(), 2);

        let rows = campaign::recipients(&db, "cid1", campaign.id).unwrap();
        let failed = rows.iter().find(|r| r.email == "c1@x.com").unwrap();
        assert_eq!(failed.status, RecipientStatus::Failed);
        // error text is withheld without diagnostics
        assert!(failed.delivery_error.is_none());
        let sent = rows.iter().find(|r| r.email == "c0@x.com").unwrap();
        assert!(sent.message_id.as_deref().unwrap().starts_with("memory-"));
        assert_eq!(sent.delivery_status.as_deref(), Some("Delivered"));
    }

    #[tokio::test]
    async fn diagnostics_keep_error_text() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_for("c0@x.com");

        let config = config::Dispatch {
            diagnostics: true,
            concurrent: false,
            ..sending()
        };
        let updated = dispatcher(db.clone(), config, transport)
            .dispatch("cid1", &campaign)
            .await
            .unwrap();
        assert_eq!(updated.status, CampaignStatus::Failed);

        let rows = campaign::recipients(&db, "cid1", campaign.id).unwrap();
        assert!(rows[0]
            .delivery_error
            .as_deref()
            .unwrap()
            .contains("mailbox unavailable"));
    }

    #[tokio::test]
    async fn messages_are_personalized() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let transport = Arc::new(MemoryTransport::new());

        dispatcher(db.clone(), sending(), transport.clone())
            .dispatch("cid1", &campaign)
            .await
            .unwrap();

        let rows = campaign::recipients(&db, "cid1", campaign.id).unwrap();
        let (_, email) = &transport.sent()[0];
        assert!(!email.html.contains("{{"));
        assert!(email.html.contains(&format!("contactId={}", rows[0].contact_id)));
        assert!(email.html.contains(&format!("campaignId={}", campaign.id)));
        assert_eq!(email.plain_text, "Hello\n\nDon't want these emails? Unsubscribe");
        assert_eq!(email.sender, "news@council.example");
    }

    #[tokio::test]
    async fn in_flight_sends_respect_the_cap() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 12).await;
        let transport = Arc::new(MemoryTransport::with_delay(Duration::from_millis(20)));

        let config = config::Dispatch {
            batch_size: 6,
            max_concurrent: 3,
            ..sending()
        };
        let updated = dispatcher(db.clone(), config, transport.clone())
            .dispatch("cid1", &campaign)
            .await
            .unwrap();

        assert_eq!(updated.sent_count, 12);
        assert_eq!(transport.sent().len(), 12);
        assert!(transport.peak_in_flight() <= 3);
        assert!(transport.peak_in_flight() > 1);
    }

    #[tokio::test]
    async fn missing_sender_is_recorded_as_error() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let transport = Arc::new(MemoryTransport::new());

        let dispatcher = Dispatcher::new(db.clone(), sending(), String::new(), Some(transport.clone()));
        let updated = dispatcher.dispatch("cid1", &campaign).await.unwrap();

        assert_eq!(updated.dispatch_state, DispatchState::Error);
        assert!(updated.dispatch_error.unwrap().contains("sender"));
        assert!(transport.sent().is_empty());

        // error state can be claimed again
        let retry = Dispatcher::new(db, sending(), "news@council.example".to_string(), Some(transport.clone()));
        let updated = retry.dispatch("cid1", &campaign).await.unwrap();
        assert_eq!(updated.dispatch_state, DispatchState::Sent);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_transport_is_recorded_as_error() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let dispatcher = Dispatcher::new(db, sending(), "news@council.example".to_string(), None);
        let updated = dispatcher.dispatch("cid1", &campaign).await.unwrap();
        assert_eq!(updated.dispatch_state, DispatchState::Error);
        assert!(updated.dispatch_error.unwrap().contains("misconfigured"));
    }

    #[tokio::test]
    async fn transport_misconfiguration_is_reported() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let config = crate::Config {
            email: config::Email {
                sender: "news@council.example".to_string(),
                transport: config::TransportKind::Smtp,
                ..Default::default()
            },
            dispatch: sending(),
            ..Default::default()
        };
        let updated = Dispatcher::from_config(db, &config)
            .dispatch("cid1", &campaign)
            .await
            .unwrap();
        assert_eq!(updated.dispatch_state, DispatchState::Error);
        assert!(updated.dispatch_error.unwrap().contains("missing smtp server"));
    }

    #[tokio::test]
    async fn recipients_without_address_are_skipped() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let blank = Recipient::new("cid1", campaign.id, Uuid::new_v4(), "");
        db.upsert(&blank).unwrap();
        let transport = Arc::new(MemoryTransport::new());

        let updated = dispatcher(db.clone(), sending(), transport.clone())
            .dispatch("cid1", &campaign)
            .await
            .unwrap();

        assert_eq!(updated.status, CampaignStatus::Sent);
        assert_eq!(updated.sent_count, 1);
        assert_eq!(updated.pending_count, 1);
        assert_eq!(transport.sent().len(), 1);

        let row = db.get::<Recipient>("cid1", blank.id).unwrap();
        assert_eq!(row.status, RecipientStatus::Pending);
        assert!(row.message_id.is_none());
        assert!(row.sent_at.is_none());

        let summary = Summary::tally(&campaign::recipients(&db, "cid1", campaign.id).unwrap());
        assert_eq!(summary, Summary { total: 2, sent: 1, failed: 0, pending: 1 });
    }

    #[tokio::test]
    async fn dropped_caller_does_not_strand_the_campaign() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 2).await;
        let transport = Arc::new(MemoryTransport::with_delay(Duration::from_millis(200)));
        let dispatcher = dispatcher(db.clone(), sending(), transport.clone());

        let cut_short =
            tokio::time::timeout(Duration::from_millis(50), dispatcher.dispatch("cid1", &campaign))
                .await;
        assert!(cut_short.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let settled = db.get::<Campaign>("cid1", campaign.id).unwrap();
        assert_eq!(settled.dispatch_state, DispatchState::Sent);
        assert_eq!(settled.sent_count, 2);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn abandoned_claim_is_taken_over_after_lease() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 1).await;
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = dispatcher(db.clone(), sending(), transport.clone());

        let abandon = |age: chrono::Duration| {
            db.update::<Campaign>("cid1", campaign.id, |c| {
                c.dispatch_state = DispatchState::Dispatching;
                c.claimed_at = Some(Utc::now() - age);
                true
            })
            .unwrap();
        };

        abandon(chrono::Duration::seconds(1));
        let err = dispatcher.dispatch("cid1", &campaign).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DispatchConflict(_)));
        assert!(transport.sent().is_empty());

        abandon(chrono::Duration::hours(1));
        let updated = dispatcher.dispatch("cid1", &campaign).await.unwrap();
        assert_eq!(updated.dispatch_state, DispatchState::Sent);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn settled_campaign_cannot_be_dispatched_twice() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 2).await;
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = dispatcher(db, sending(), transport.clone());

        dispatcher.dispatch("cid1", &campaign).await.unwrap();
        let err = dispatcher.dispatch("cid1", &campaign).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DispatchConflict(_)));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_runs_send_once() {
        let db = Arc::new(Database::temporary().unwrap());
        let campaign = setup(&db, 4).await;
        let transport = Arc::new(MemoryTransport::with_delay(Duration::from_millis(10)));
        let dispatcher = dispatcher(db, sending(), transport.clone());

        let (a, b) = tokio::join!(
            dispatcher.dispatch("cid1", &campaign),
            dispatcher.dispatch("cid1", &campaign)
        );
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let db = Arc::new(Database::temporary().unwrap());
        let dispatcher = dispatcher(db, sending(), Arc::new(MemoryTransport::new()));
        let err = dispatcher
            .dispatch_with("cid1", Uuid::new_v4(), &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
