use super::{
    entitlement_record::EntitlementRecord, purchase_event::TransactionId,
    validation_result::ValidationReason,
};

/// Emitted whenever the ledger state of a transaction changes.
///
/// Delivery is at-least-once from the consumer's point of view; a repeated
/// notification for an unchanged record must be treated as a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementChanged {
    pub product_id: String,
    pub record: EntitlementRecord,
}

/// Emitted for transactions that will never be granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailed {
    pub transaction_id: TransactionId,
    pub product_id: String,
    pub reason: ValidationReason,
}
