//! Per-recipient delivery records.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::message::Message;

/// Retries allowed before a delivery is marked failed.
pub const MAX_RETRIES: u32 = 3;

/// Error recorded when the retry budget is spent.
pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// A delivery identifier. Ids increase in creation order.
pub type DeliveryId = u64;

static NEXT_DELIVERY_ID: AtomicU64 = AtomicU64::new(1);

fn next_delivery_id() -> DeliveryId {
    NEXT_DELIVERY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// One message routed to one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Delivery id.
    pub id: DeliveryId,
    /// The message being delivered.
    pub message: Arc<Message>,
    /// Recipient session id.
    pub connection: String,
    /// Current status.
    pub status: DeliveryStatus,
    /// Failed attempts so far.
    pub retries: u32,
    /// Last failure reason.
    pub error: Option<String>,
    /// When the delivery completed, epoch milliseconds.
    pub delivered_at: Option<u64>,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl Delivery {
    /// Create a pending delivery.
    #[must_use]
    pub fn new(message: Arc<Message>, connection: impl Into<String>, now: u64) -> Self {
        Self {
            id: next_delivery_id(),
            message,
            connection: connection.into(),
            status: DeliveryStatus::Pending,
            retries: 0,
            error: None,
            delivered_at: None,
            created_at: now,
        }
    }

    /// Whether the delivery still awaits sending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    /// Mark as delivered.
    pub fn mark_delivered(&mut self, now: u64) {
        self.status = DeliveryStatus::Delivered;
        self.delivered_at = Some(now);
        self.error = None;
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` while more attempts are allowed. Once `retries`
    /// exceeds `max_retries` the delivery is marked failed and `false` is
    /// returned; further calls leave it untouched.
    pub fn record_retry(&mut self, max_retries: u32) -> bool {
        if self.status != DeliveryStatus::Pending {
            return false;
        }

        self.retries += 1;
        if self.retries > max_retries {
            self.status = DeliveryStatus::Failed;
            self.error = Some(MAX_RETRIES_EXCEEDED.to_string());
            return false;
        }
        true
    }
}
