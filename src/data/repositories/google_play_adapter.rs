use crate::{
    data::models::native_updates::google_play_purchase_model::GooglePlayPurchaseModel,
    domain::{
        entities::purchase_event::{PurchaseEvent, Store, TransactionId},
        repositories::store_adapter::StoreAdapter,
    },
    errors::IapError,
};

/// Translates Google Play Billing purchase updates.
///
/// The purchase token is both the transaction identity and the receipt: it
/// is stable across redelivery and across subscription renewals.
pub struct GooglePlayAdapter {
    package_name: String,
}

impl GooglePlayAdapter {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
        }
    }
}

impl StoreAdapter for GooglePlayAdapter {
    fn store(&self) -> Store {
        Store::GooglePlay
    }

    fn translate(&self, native_update: &str) -> Result<PurchaseEvent, IapError> {
        let m: GooglePlayPurchaseModel = serde_json::from_str(native_update).map_err(|e| {
            IapError::InvalidNativeUpdate(format!("failed to parse Google Play purchase: {e}"))
        })?;
        if m.package_name != self.package_name {
            return Err(IapError::InvalidNativeUpdate(format!(
                "purchase belongs to package '{}', expected '{}'",
                m.package_name, self.package_name
            )));
        }
        let product_id = match m.all_product_ids().as_slice() {
            [product_id] => product_id.to_string(),
            [] => {
                return Err(IapError::InvalidNativeUpdate(
                    "purchase does not name a product".into(),
                ))
            }
            ids => {
                return Err(IapError::InvalidNativeUpdate(format!(
                    "multi-product purchases are not supported ({})",
                    ids.join(", ")
                )))
            }
        };
        PurchaseEvent::new(
            TransactionId(m.purchase_token.clone()),
            product_id,
            Store::GooglePlay,
            m.purchase_token,
            m.purchase_time,
            m.quantity.unwrap_or(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GooglePlayAdapter {
        GooglePlayAdapter::new("com.example.game")
    }

    #[test]
    fn translates_billing_purchase() {
        let event = adapter()
            .translate(
                r#"{
                    "orderId": "GPA.3333-4444-5555-66666",
                    "packageName": "com.example.game",
                    "productId": "gold_100",
                    "purchaseTime": 1690000000000,
                    "purchaseState": 0,
                    "purchaseToken": "opaque-token.AO-J1Oy",
                    "quantity": 3,
                    "acknowledged": false
                }"#,
            )
            .unwrap();
        assert_eq!(event.transaction_id().as_str(), "opaque-token.AO-J1Oy");
        assert_eq!(event.raw_receipt(), "opaque-token.AO-J1Oy");
        assert_eq!(event.product_id(), "gold_100");
        assert_eq!(event.store(), Store::GooglePlay);
        assert_eq!(event.quantity(), 3);
        assert_eq!(event.purchase_time().timestamp_millis(), 1_690_000_000_000);
    }

    #[test]
    fn accepts_product_ids_array() {
        let event = adapter()
            .translate(
                r#"{
                    "packageName": "com.example.game",
                    "productIds": ["pro_monthly"],
                    "purchaseTime": 1690000000000,
                    "purchaseToken": "tok",
                    "autoRenewing": true
                }"#,
            )
            .unwrap();
        assert_eq!(event.product_id(), "pro_monthly");
        assert_eq!(event.quantity(), 1);
    }

    #[test]
    fn rejects_foreign_package_and_multi_product() {
        let foreign = r#"{"packageName": "com.other", "productId": "a",
            "purchaseTime": 1, "purchaseToken": "t"}"#;
        assert!(matches!(
            adapter().translate(foreign),
            Err(IapError::InvalidNativeUpdate(_))
        ));

        let multi = r#"{"packageName": "com.example.game", "productIds": ["a", "b"],
            "purchaseTime": 1, "purchaseToken": "t"}"#;
        assert!(adapter().translate(multi).is_err());

        assert!(adapter().translate("not json").is_err());
    }
}
