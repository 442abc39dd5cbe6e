use crate::{
    data::models::native_updates::app_store_transaction_model::AppStoreTransactionModel,
    domain::{
        entities::purchase_event::{PurchaseEvent, Store, TransactionId},
        repositories::store_adapter::StoreAdapter,
    },
    errors::IapError,
};

/// Translates StoreKit 2 transaction updates.
///
/// Each renewal of a subscription is its own transaction; the ledger's
/// product policy lets the newest one supersede the previous.
pub struct AppStoreAdapter {
    bundle_id: String,
}

impl AppStoreAdapter {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
        }
    }
}

impl StoreAdapter for AppStoreAdapter {
    fn store(&self) -> Store {
        Store::AppStore
    }

    fn translate(&self, native_update: &str) -> Result<PurchaseEvent, IapError> {
        let m: AppStoreTransactionModel = serde_json::from_str(native_update).map_err(|e| {
            IapError::InvalidNativeUpdate(format!("failed to parse StoreKit transaction: {e}"))
        })?;
        if m.bundle_id != self.bundle_id {
            return Err(IapError::InvalidNativeUpdate(format!(
                "transaction belongs to bundle '{}', expected '{}'",
                m.bundle_id, self.bundle_id
            )));
        }
        let raw_receipt = m
            .jws_representation
            .filter(|jws| !jws.trim().is_empty())
            .unwrap_or_else(|| m.transaction_id.clone());
        PurchaseEvent::new(
            TransactionId(m.transaction_id),
            m.product_id,
            Store::AppStore,
            raw_receipt,
            m.purchase_date,
            m.quantity.unwrap_or(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AppStoreAdapter {
        AppStoreAdapter::new("com.example.game")
    }

    #[test]
    fn prefers_jws_representation_as_receipt() {
        let event = adapter()
            .translate(
                r#"{
                    "transactionId": "2000000123456789",
                    "originalTransactionId": "2000000000000001",
                    "productId": "pro_monthly",
                    "bundleId": "com.example.game",
                    "purchaseDate": 1690000000000,
                    "jwsRepresentation": "eyJhbGciOiJFUzI1NiJ9.eyJ9.c2ln"
                }"#,
            )
            .unwrap();
        assert_eq!(event.transaction_id().as_str(), "2000000123456789");
        assert_eq!(event.raw_receipt(), "eyJhbGciOiJFUzI1NiJ9.eyJ9.c2ln");
        assert_eq!(event.store(), Store::AppStore);
    }

    #[test]
    fn falls_back_to_transaction_id() {
        let event = adapter()
            .translate(
                r#"{
                    "transactionId": "77",
                    "productId": "gold_100",
                    "bundleId": "com.example.game",
                    "purchaseDate": 1690000000000,
                    "quantity": 2,
                    "jwsRepresentation": ""
                }"#,
            )
            .unwrap();
        assert_eq!(event.raw_receipt(), "77");
        assert_eq!(event.quantity(), 2);
    }

    #[test]
    fn rejects_foreign_bundle() {
        let result = adapter().translate(
            r#"{"transactionId": "1", "productId": "a", "bundleId": "com.other",
                "purchaseDate": 1}"#,
        );
        assert!(matches!(result, Err(IapError::InvalidNativeUpdate(_))));
    }
}
