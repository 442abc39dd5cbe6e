use async_trait::async_trait;

use crate::domain::entities::{
    purchase_event::{Store, TransactionId},
    validation_result::ValidationResult,
};

#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    /// Verifies a raw receipt against the issuing store.
    ///
    /// Never fails as such: every outcome, including network trouble, is
    /// expressed through the returned reason. Only a `Valid` result grants.
    async fn validate(
        &self,
        transaction_id: &TransactionId,
        raw_receipt: &str,
        store: Store,
        product_id: &str,
    ) -> ValidationResult;
}
