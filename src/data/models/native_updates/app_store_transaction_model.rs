#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::{serde_as, TimestampMilliSeconds};

/// A StoreKit 2 `Transaction`, flattened by the iOS side of the plugin bridge.
///
/// https://developer.apple.com/documentation/storekit/transaction
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AppStoreTransactionModel {
    /// The unique identifier for the transaction. Encoded as a string to avoid
    /// precision loss in the bridge.
    pub(crate) transaction_id: String,
    pub(crate) original_transaction_id: Option<String>,
    pub(crate) product_id: String,
    pub(crate) bundle_id: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub(crate) purchase_date: DateTime<Utc>,
    pub(crate) quantity: Option<u32>,
    /// The signed transaction, as returned by `Transaction.jwsRepresentation`
    /// (or `VerificationResult.jwsRepresentation`).
    pub(crate) jws_representation: Option<String>,
}
