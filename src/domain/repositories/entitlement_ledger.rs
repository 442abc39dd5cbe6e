use chrono::{DateTime, Utc};

use crate::{
    domain::entities::{
        entitlement_record::{CommitOutcome, EntitlementRecord, Transition},
        purchase_event::TransactionId,
    },
    errors::IapError,
};

/// Durable source of truth for granted entitlements.
///
/// Operations are local and fast, and atomic per transaction ID. Errors are
/// only ever journal (storage) failures; conflicting writes are resolved by
/// the compare-and-commit contract instead.
pub trait EntitlementLedger: Send + Sync {
    /// Inserts an Active record unless the transaction is already present, in
    /// which case the stored record is returned unchanged.
    fn commit(
        &self,
        transaction_id: &TransactionId,
        product_id: &str,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CommitOutcome, IapError>;

    /// Active -> Revoked. Returns `None` if the transaction is unknown.
    fn revoke(&self, transaction_id: &TransactionId) -> Result<Option<Transition>, IapError>;

    /// Active -> Expired. Returns `None` if the transaction is unknown.
    fn expire(&self, transaction_id: &TransactionId) -> Result<Option<Transition>, IapError>;

    /// The product's current Active record, if any.
    fn query(&self, product_id: &str) -> Option<EntitlementRecord>;

    fn get(&self, transaction_id: &TransactionId) -> Option<EntitlementRecord>;
}
