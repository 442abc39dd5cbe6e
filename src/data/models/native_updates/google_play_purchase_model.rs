#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::{serde_as, TimestampMilliSeconds};

/// The purchase JSON reported on device by the Google Play Billing Library
/// (`Purchase.getOriginalJson()`), as forwarded across the plugin bridge.
///
/// https://developer.android.com/reference/com/android/billingclient/api/Purchase
///
/// Older Billing Library versions report a single `productId`; newer ones a
/// `productIds` array.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GooglePlayPurchaseModel {
    /// Unique order identifier for the transaction. Absent for test
    /// purchases made with license testers.
    pub(crate) order_id: Option<String>,
    /// The application package from which the purchase originated.
    pub(crate) package_name: String,
    pub(crate) product_id: Option<String>,
    #[serde(default)]
    pub(crate) product_ids: Vec<String>,
    /// The time the product was purchased, in milliseconds since the epoch.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub(crate) purchase_time: DateTime<Utc>,
    /// Raw on-device purchase state. The encoding differs from the Developer
    /// API one and is not interpreted here; the store is asked instead.
    pub(crate) purchase_state: Option<u8>,
    /// A token that uniquely identifies a purchase for a given item and user
    /// pair.
    pub(crate) purchase_token: String,
    /// Only present for multi-quantity purchases.
    pub(crate) quantity: Option<u32>,
    #[serde(default)]
    pub(crate) acknowledged: bool,
    #[serde(default)]
    pub(crate) auto_renewing: bool,
}

impl GooglePlayPurchaseModel {
    /// All product IDs of the purchase, whichever field carried them.
    pub(crate) fn all_product_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.product_ids.iter().map(String::as_str).collect();
        if let Some(id) = &self.product_id {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }
}
