use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::model::{Event, PropertyId, Reservation, UserId};

/// Broadcast hub of committed events per property, for live calendars.
pub struct NotifyHub {
    channels: DashMap<PropertyId, broadcast::Sender<Event>>,
    capacity: usize,
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to a property's events. Creates the channel if needed.
    pub fn subscribe(&self, property_id: PropertyId) -> broadcast::Receiver<Event> {
        let capacity = self.capacity;
        let sender = self
            .channels
            .entry(property_id)
            .or_insert_with(|| broadcast::channel(capacity).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, property_id: PropertyId, event: &Event) {
        if let Some(sender) = self.channels.get(&property_id) {
            let _ = sender.send(event.clone());
        }
    }
}

// ── Outbound user notifications ──────────────────────────────────

/// Delivery failure reported by a dispatcher. Logged and dropped; it never
/// reaches the caller of the transition that triggered it.
#[derive(Debug, Error)]
#[error("notification to {user_id} failed: {reason}")]
pub struct DispatchError {
    pub user_id: UserId,
    pub reason: String,
}

/// External delivery channel (push, e-mail, in-app inbox, ...).
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        user_id: UserId,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<(), DispatchError>;
}

/// Dispatcher that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(
        &self,
        user_id: UserId,
        title: &str,
        _body: &str,
        metadata: serde_json::Value,
    ) -> Result<(), DispatchError> {
        tracing::info!(%user_id, title, %metadata, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Requested,
    Approved,
    Rejected,
}

/// Fire-and-forget front for a dispatcher.
#[derive(Clone)]
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl Notifier {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Spawn delivery and return immediately. The handle is only useful to
    /// tests; failures are logged inside the task.
    pub fn notify(&self, user_id: UserId, kind: NotificationKind, reservation: &Reservation) -> JoinHandle<()> {
        let (title, body) = render(kind, reservation);
        let metadata = json!({
            "kind": kind,
            "reservationId": reservation.id.to_string(),
            "propertyId": reservation.property_id.to_string(),
            "checkIn": reservation.stay.check_in,
            "checkOut": reservation.stay.check_out,
            "totalPrice": reservation.total_price,
            "currency": reservation.currency,
        });
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send(user_id, &title, &body, metadata).await {
                metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
                tracing::warn!(%user_id, error = %e, "notification dropped");
            }
        })
    }
}

fn render(kind: NotificationKind, r: &Reservation) -> (String, String) {
    let dates = format!("{} to {}", r.stay.check_in, r.stay.check_out);
    match kind {
        NotificationKind::Requested => (
            "New reservation request".to_string(),
            format!("{} nights, {dates}, {} {}", r.nights, r.total_price, r.currency),
        ),
        NotificationKind::Approved => (
            "Reservation approved".to_string(),
            format!("Your stay {dates} is confirmed"),
        ),
        NotificationKind::Rejected => (
            "Reservation declined".to_string(),
            format!("Your request for {dates} was declined"),
        ),
    }
}
