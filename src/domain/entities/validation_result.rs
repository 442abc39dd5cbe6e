use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::purchase_event::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Valid,
    /// Subscription lapsed, or was paused / put on hold by the store.
    Expired,
    /// Refunded, charged back, or otherwise voided by the store.
    Revoked,
    /// Receipt is corrupt or unknown to the store. Never retried.
    Malformed,
    /// The store could not be reached. Retry later.
    StoreUnreachable,
    /// The store reports the purchase as awaiting payment. The store
    /// redelivers the purchase once it settles.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub transaction_id: TransactionId,
    pub verified: bool,
    /// Expiry of a verified subscription; the caller re-validates before it.
    pub expiry: Option<DateTime<Utc>>,
    pub reason: ValidationReason,
}

impl ValidationResult {
    pub fn valid(transaction_id: TransactionId, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            transaction_id,
            verified: true,
            expiry,
            reason: ValidationReason::Valid,
        }
    }

    pub fn rejected(transaction_id: TransactionId, reason: ValidationReason) -> Self {
        Self {
            transaction_id,
            verified: reason == ValidationReason::Valid,
            expiry: None,
            reason,
        }
    }
}
