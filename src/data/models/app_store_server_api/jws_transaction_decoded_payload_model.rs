#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_repr::Deserialize_repr;
use serde_with::{serde_as, TimestampMilliSeconds};

use super::common::Environment;

/// Data structure for the decoded payload of a JWSTransaction, as returned by
/// the App Store Server API and as carried by StoreKit 2's
/// `jwsRepresentation` on device.
///
/// https://developer.apple.com/documentation/appstoreserverapi/jwstransactiondecodedpayload
///
/// Only the fields needed for verification are modelled. Whether fields are
/// nullable is not documented explicitly in the API reference, so reasonable
/// assumptions are made.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JwsTransactionDecodedPayloadModel {
    /// The bundle identifier of the app.
    pub(crate) bundle_id: String,
    /// The server environment, either sandbox or production.
    pub(crate) environment: Environment,
    /// The UNIX time, in milliseconds, that the subscription expires or renews.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub(crate) expires_date: Option<DateTime<Utc>>,
    /// The transaction identifier of the original purchase.
    pub(crate) original_transaction_id: String,
    /// The unique identifier of the product.
    pub(crate) product_id: String,
    /// The UNIX time, in milliseconds, that the App Store charged the
    /// customer’s account for a purchase, restored product, subscription, or
    /// subscription renewal after a lapse.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub(crate) purchase_date: DateTime<Utc>,
    /// The number of consumable products the customer purchased.
    pub(crate) quantity: Option<i32>,
    /// The UNIX time, in milliseconds, that the App Store refunded the
    /// transaction or revoked it from Family Sharing.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub(crate) revocation_date: Option<DateTime<Utc>>,
    /// The reason that the App Store refunded the transaction or revoked it
    /// from Family Sharing.
    pub(crate) revocation_reason: Option<RevocationReason>,
    /// The unique identifier of the transaction.
    pub(crate) transaction_id: String,
    /// The type of the in-app purchase.
    #[serde(rename = "type")]
    pub(crate) transaction_type: Option<TransactionType>,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum RevocationReason {
    /// The App Store refunded the transaction on behalf of the customer for
    /// other reasons, for example, an accidental purchase.
    Other = 0,
    /// The App Store refunded the transaction on behalf of the customer due to
    /// an actual or perceived issue within your app.
    Issue = 1,
}

#[derive(Debug, Deserialize, PartialEq)]
pub(crate) enum TransactionType {
    /// An auto-renewable subscription.
    #[serde(rename = "Auto-Renewable Subscription")]
    AutoRenewableSubscription,
    /// A non-consumable In-App Purchase.
    #[serde(rename = "Non-Consumable")]
    NonConsumable,
    /// A consumable In-App Purchase.
    #[serde(rename = "Consumable")]
    Consumable,
    /// A non-renewing subscription.
    #[serde(rename = "Non-Renewing Subscription")]
    NonRenewableSubscription,

    #[serde(untagged)]
    Unknown(String),
}

impl JwsTransactionDecodedPayloadModel {
    pub(crate) fn is_revoked(&self) -> bool {
        self.revocation_date.is_some() || self.revocation_reason.is_some()
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_date.map(|e| e <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscription_payload() {
        let m: JwsTransactionDecodedPayloadModel = serde_json::from_str(
            r#"{
                "bundleId": "com.example.game",
                "environment": "Sandbox",
                "expiresDate": 1700000000000,
                "originalTransactionId": "1000000000000001",
                "productId": "pro_monthly",
                "purchaseDate": 1690000000000,
                "quantity": 1,
                "transactionId": "1000000000000002",
                "type": "Auto-Renewable Subscription",
                "storefront": "NLD"
            }"#,
        )
        .unwrap();
        assert_eq!(m.environment, Environment::Sandbox);
        assert_eq!(m.expires_date.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(
            m.transaction_type,
            Some(TransactionType::AutoRenewableSubscription)
        );
        assert!(!m.is_revoked());
        assert!(m.is_expired_at(Utc::now()));
    }

    #[test]
    fn missing_optional_dates_are_none() {
        let m: JwsTransactionDecodedPayloadModel = serde_json::from_str(
            r#"{
                "bundleId": "com.example.game",
                "environment": "Production",
                "originalTransactionId": "1",
                "productId": "gold_100",
                "purchaseDate": 1690000000000,
                "transactionId": "1",
                "revocationReason": 1
            }"#,
        )
        .unwrap();
        assert!(m.expires_date.is_none());
        assert!(m.is_revoked());
        assert!(!m.is_expired_at(Utc::now()));
    }
}
