use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{
    entitlement_record::{EntitlementRecord, EntitlementState},
    purchase_event::TransactionId,
};

/// One line of the ledger journal: the full state of a record after a
/// change. Replaying the journal keeps the last line per transaction ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntitlementRecordModel {
    pub(crate) transaction_id: String,
    pub(crate) product_id: String,
    pub(crate) granted_at: DateTime<Utc>,
    pub(crate) state: EntitlementStateModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expires_at: Option<DateTime<Utc>>,
    /// When the change was written.
    pub(crate) recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum EntitlementStateModel {
    Active,
    Expired,
    Revoked,
}

impl EntitlementRecordModel {
    pub(crate) fn from_record(record: &EntitlementRecord, recorded_at: DateTime<Utc>) -> Self {
        Self {
            transaction_id: record.transaction_id.0.clone(),
            product_id: record.product_id.clone(),
            granted_at: record.granted_at,
            state: match record.state {
                EntitlementState::Active => EntitlementStateModel::Active,
                EntitlementState::Expired => EntitlementStateModel::Expired,
                EntitlementState::Revoked => EntitlementStateModel::Revoked,
            },
            expires_at: record.expires_at,
            recorded_at,
        }
    }

    pub(crate) fn into_record(self) -> EntitlementRecord {
        EntitlementRecord {
            product_id: self.product_id,
            transaction_id: TransactionId(self.transaction_id),
            granted_at: self.granted_at,
            state: match self.state {
                EntitlementStateModel::Active => EntitlementState::Active,
                EntitlementStateModel::Expired => EntitlementState::Expired,
                EntitlementStateModel::Revoked => EntitlementState::Revoked,
            },
            expires_at: self.expires_at,
        }
    }
}
