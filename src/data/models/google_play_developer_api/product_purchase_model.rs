#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_repr::Deserialize_repr;
use serde_with::{serde_as, TimestampMilliSeconds};

/// Data structure returned by the Google Play Developer API when querying for a
/// product purchase.
///
/// https://developers.google.com/android-publisher/api-ref/rest/v3/purchases.products#ProductPurchase
///
/// Whether fields are nullable is not documented explicitly in the API
/// reference, so reasonable assumptions are made.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductPurchaseModel {
    /// The time the product was purchased, in milliseconds since the epoch (Jan
    /// 1, 1970). Encoded by the API as an int64 string.
    #[serde_as(as = "TimestampMilliSeconds<String>")]
    pub(crate) purchase_time_millis: DateTime<Utc>,
    /// The purchase state of the order.
    pub(crate) purchase_state: PurchaseState,
    /// The consumption state of the inapp product.
    pub(crate) consumption_state: Option<ConsumptionState>,
    /// The order id associated with the purchase of the inapp product.
    pub(crate) order_id: Option<String>,
    /// The type of purchase of the inapp product. This field is only set if
    /// this purchase was not made using the standard in-app billing flow.
    pub(crate) purchase_type: Option<PurchaseType>,
    /// The acknowledgement state of the inapp product.
    pub(crate) acknowledgement_state: Option<AcknowledgementState>,
    /// The inapp product SKU. May not be present.
    pub(crate) product_id: Option<String>,
    /// The quantity associated with the purchase of the inapp product. If not
    /// present, the quantity is 1.
    pub(crate) quantity: Option<i32>,
    /// ISO 3166-1 alpha-2 billing region code of the user at the time the
    /// product was granted.
    pub(crate) region_code: Option<String>,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum PurchaseState {
    Purchased = 0,
    Canceled = 1,
    Pending = 2,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum ConsumptionState {
    YetToBeConsumed = 0,
    Consumed = 1,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum PurchaseType {
    Test = 0,
    Promo = 1,
    Rewarded = 2,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum AcknowledgementState {
    YetToBeAcknowledged = 0,
    Acknowledged = 1,
}
