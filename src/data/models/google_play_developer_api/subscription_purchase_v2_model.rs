#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Data structure returned by the Google Play Developer API when querying for a
/// subscription purchase.
///
/// https://developers.google.com/android-publisher/api-ref/rest/v3/purchases.subscriptionsv2#SubscriptionPurchaseV2
///
/// Whether fields are nullable is not documented explicitly in the API
/// reference, so reasonable assumptions are made.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscriptionPurchaseV2Model {
    /// ISO 3166-1 alpha-2 billing country/region code of the user at the time
    /// the subscription was granted.
    pub(crate) region_code: Option<String>,
    /// Item-level info for a subscription purchase. The items in the same
    /// purchase should be either all with AutoRenewingPlan or all with
    /// PrepaidPlan.
    #[serde(default)]
    pub(crate) line_items: Vec<SubscriptionPurchaseLineItem>,
    /// Time at which the subscription was granted. Not set for pending
    /// subscriptions (subscription was created but awaiting payment during
    /// signup).
    pub(crate) start_time: Option<DateTime<Utc>>,
    /// The current state of the subscription.
    pub(crate) subscription_state: SubscriptionState,
    /// The order id of the latest order associated with the purchase of the
    /// subscription.
    pub(crate) latest_order_id: Option<String>,
    /// The purchase token of the old subscription if this subscription is a
    /// re-signup, upgrade/downgrade, or plan conversion.
    pub(crate) linked_purchase_token: Option<String>,
    /// Only present if this subscription purchase is a test purchase.
    pub(crate) test_purchase: Option<TestPurchase>,
}

/// The potential states a subscription can be in, for example whether it is
/// active or canceled. The items within a subscription purchase can either be
/// all auto renewing plans or prepaid plans.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum SubscriptionState {
    /// Unspecified subscription state.
    SubscriptionStateUnspecified,
    /// Subscription was created but awaiting payment during signup. In this
    /// state, all items are awaiting payment.
    SubscriptionStatePending,
    /// Subscription is active.
    SubscriptionStateActive,
    /// Subscription is paused. Only available for auto renewing plans.
    SubscriptionStatePaused,
    /// Subscription is in grace period. Only available for auto renewing
    /// plans.
    SubscriptionStateInGracePeriod,
    /// Subscription is on hold (suspended). Only available for auto renewing
    /// plans.
    SubscriptionStateOnHold,
    /// Subscription is canceled but not expired yet. Only available for auto
    /// renewing plans.
    SubscriptionStateCanceled,
    /// Subscription is expired. All items have expiryTime in the past.
    SubscriptionStateExpired,
    /// Pending transaction for subscription is canceled.
    SubscriptionStatePendingPurchaseCanceled,

    #[serde(untagged)]
    Unknown(String),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TestPurchase {}

/// Item-level info for a subscription purchase.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscriptionPurchaseLineItem {
    /// The purchased product ID (for example, 'monthly001').
    pub(crate) product_id: String,
    /// Time at which the subscription expired or will expire unless the access
    /// is extended (ex. renews).
    pub(crate) expiry_time: DateTime<Utc>,
}

impl SubscriptionPurchaseV2Model {
    /// Latest expiry among the line items for `product_id`.
    pub(crate) fn expiry_of(&self, product_id: &str) -> Option<DateTime<Utc>> {
        self.line_items
            .iter()
            .filter(|li| li.product_id == product_id)
            .map(|li| li.expiry_time)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_response() {
        let m: SubscriptionPurchaseV2Model = serde_json::from_str(
            r#"{
                "kind": "androidpublisher#subscriptionPurchaseV2",
                "regionCode": "US",
                "startTime": "2024-01-01T00:00:00.000Z",
                "subscriptionState": "SUBSCRIPTION_STATE_ACTIVE",
                "latestOrderId": "GPA.0000-0000-0000-00000",
                "acknowledgementState": "ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED",
                "lineItems": [
                    {"productId": "pro_monthly", "expiryTime": "2024-02-01T00:00:00Z"},
                    {"productId": "pro_monthly", "expiryTime": "2024-03-01T00:00:00.123456789Z"},
                    {"productId": "other", "expiryTime": "2030-01-01T00:00:00Z"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            m.subscription_state,
            SubscriptionState::SubscriptionStateActive
        );
        assert_eq!(
            m.expiry_of("pro_monthly").unwrap().to_rfc3339(),
            "2024-03-01T00:00:00.123456789+00:00"
        );
        assert!(m.expiry_of("missing").is_none());
    }

    #[test]
    fn tolerates_unknown_state() {
        let m: SubscriptionPurchaseV2Model =
            serde_json::from_str(r#"{"subscriptionState": "SUBSCRIPTION_STATE_NEW_THING"}"#)
                .unwrap();
        assert!(matches!(m.subscription_state, SubscriptionState::Unknown(_)));
        assert!(m.line_items.is_empty());
    }
}
