use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use crate::{ErrorKind, Result};

use super::{OutgoingEmail, Transport};

/// Keeps accepted messages in memory instead of delivering them.
///
/// Used in development and tests. Selected addresses can be made to fail and
/// each send can be held for a while to observe how many are in flight at
/// once.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(String, OutgoingEmail)>>,
    failing: Mutex<HashSet<String>>,
    delay: Duration,

    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every send for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Makes every send to `address` fail.
    pub fn fail_for(&self, address: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(address.to_lowercase());
        }
    }

    /// Accepted messages along with the ids handed out for them.
    pub fn sent(&self) -> Vec<(String, OutgoingEmail)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Highest number of sends observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&email.to.to_lowercase()))
            .unwrap_or(false);
        if failing {
            return Err(ErrorKind::Transport(format!("mailbox unavailable: {}", email.to)).into());
        }

        let id = format!("memory-{}", Uuid::new_v4());
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((id.clone(), email.clone()));
        }
        Ok(id)
    }

    async fn status(&self, message_id: &str) -> Result<Option<String>> {
        let known = self
            .sent
            .lock()
            .map(|s| s.iter().any(|(id, _)| id == message_id))
            .unwrap_or(false);
        Ok(known.then(|| "Delivered".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_fails_on_request() {
        let transport = MemoryTransport::new();
        transport.fail_for("Bad@x.com");

        let ok = OutgoingEmail {
            to: "a@x.com".to_string(),
            ..Default::default()
        };
        let bad = OutgoingEmail {
            to: "bad@x.com".to_string(),
            ..Default::default()
        };

        let id = transport.send(&ok).await.unwrap();
        assert!(transport.send(&bad).await.is_err());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.status(&id).await.unwrap().as_deref(), Some("Delivered"));
        assert_eq!(transport.status("unknown").await.unwrap(), None);
        assert_eq!(transport.peak_in_flight(), 1);
    }
}
