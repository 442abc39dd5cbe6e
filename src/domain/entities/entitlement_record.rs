use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::purchase_event::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub product_id: String,
    pub transaction_id: TransactionId,
    pub granted_at: DateTime<Utc>,
    pub state: EntitlementState,
    /// Subscription expiry as reported by the store when the grant was made.
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntitlementRecord {
    pub fn is_active(&self) -> bool {
        self.state == EntitlementState::Active
    }
}

/// Result of a compare-and-commit against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub record: EntitlementRecord,
    /// False when the transaction was already present.
    pub changed: bool,
    /// The previously Active record for the product, if this commit replaced
    /// it.
    pub superseded: Option<EntitlementRecord>,
}

/// Result of a state transition on an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub record: EntitlementRecord,
    pub changed: bool,
}
