use std::sync::Arc;

use crate::{
    config::IapConfig,
    data::{
        datasources::{
            app_store_server_api_datasource::AppStoreServerApiDatasourceImpl,
            google_play_developer_api_datasource::GooglePlayDeveloperApiDatasourceImpl,
        },
        repositories::{
            app_store_adapter::AppStoreAdapter, entitlement_ledger_impl::EntitlementLedgerImpl,
            google_play_adapter::GooglePlayAdapter, receipt_validator_impl::ReceiptValidatorImpl,
        },
    },
    domain::{
        entities::{
            entitlement_record::EntitlementRecord,
            purchase_event::{Store, TransactionId},
        },
        repositories::{receipt_validator::ReceiptValidator, store_adapter::StoreAdapter},
    },
    errors::IapError,
    reconciliation::engine::{EngineReceivers, ReconciliationEngine, TransactionState},
    secrets::IapSecrets,
};

pub type IapEngine = ReconciliationEngine<dyn ReceiptValidator, EntitlementLedgerImpl>;

/// Entry point for host applications: translates native store updates and
/// feeds them through the reconciliation engine.
pub struct IapUtil {
    engine: IapEngine,
    google_play_adapter: GooglePlayAdapter,
    app_store_adapter: AppStoreAdapter,
}

impl IapUtil {
    /// Wires the store server APIs and the journal-backed ledger.
    pub async fn new(
        secrets: &IapSecrets,
        config: &IapConfig,
    ) -> Result<(Self, EngineReceivers), IapError> {
        config.validate()?;
        let validator = ReceiptValidatorImpl::new(
            AppStoreServerApiDatasourceImpl::new(
                &secrets.apple_api_key,
                &secrets.apple_key_id,
                &secrets.apple_issuer_id,
                &config.app_store_bundle_id,
            )?,
            GooglePlayDeveloperApiDatasourceImpl::new(&secrets.google_api_key).await?,
            config.google_play_package_name.clone(),
            config.app_store_bundle_id.clone(),
            config.products.clone(),
        );
        let ledger = EntitlementLedgerImpl::open(&config.ledger_path, config.products.clone())?;
        Self::with_validator(Arc::new(validator), Arc::new(ledger), config)
    }

    /// Same as [`IapUtil::new`], with the receipt validator and ledger
    /// supplied by the caller.
    pub fn with_validator(
        validator: Arc<dyn ReceiptValidator>,
        ledger: Arc<EntitlementLedgerImpl>,
        config: &IapConfig,
    ) -> Result<(Self, EngineReceivers), IapError> {
        config.validate()?;
        let (engine, receivers) = ReconciliationEngine::new(validator, ledger, &config.engine)?;
        Ok((
            Self {
                engine,
                google_play_adapter: GooglePlayAdapter::new(&config.google_play_package_name),
                app_store_adapter: AppStoreAdapter::new(&config.app_store_bundle_id),
            },
            receivers,
        ))
    }

    /// Translates a native purchase update and queues it for reconciliation.
    /// Returns the transaction ID it was filed under.
    pub fn submit_native_update(
        &self,
        store: Store,
        native_update: &str,
    ) -> Result<TransactionId, IapError> {
        let event = self.adapter(store).translate(native_update)?;
        let transaction_id = event.transaction_id().clone();
        self.engine.submit(event)?;
        Ok(transaction_id)
    }

    /// Like [`IapUtil::submit_native_update`], but re-validates even a
    /// purchase that was already granted.
    pub fn revalidate_native_update(
        &self,
        store: Store,
        native_update: &str,
    ) -> Result<TransactionId, IapError> {
        let event = self.adapter(store).translate(native_update)?;
        let transaction_id = event.transaction_id().clone();
        self.engine.revalidate(event)?;
        Ok(transaction_id)
    }

    pub fn entitlement(&self, product_id: &str) -> Option<EntitlementRecord> {
        self.engine.entitlement(product_id)
    }

    pub fn transaction_state(&self, transaction_id: &TransactionId) -> TransactionState {
        self.engine.state(transaction_id)
    }

    pub fn engine(&self) -> &IapEngine {
        &self.engine
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await
    }

    fn adapter(&self, store: Store) -> &dyn StoreAdapter {
        match store {
            Store::GooglePlay => &self.google_play_adapter,
            Store::AppStore => &self.app_store_adapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::entities::{
        product_catalog::ProductCatalog, validation_result::ValidationResult,
    };

    struct AcceptAll;

    #[async_trait]
    impl ReceiptValidator for AcceptAll {
        async fn validate(
            &self,
            transaction_id: &TransactionId,
            _raw_receipt: &str,
            _store: Store,
            _product_id: &str,
        ) -> ValidationResult {
            ValidationResult::valid(transaction_id.clone(), None)
        }
    }

    fn config() -> IapConfig {
        IapConfig::from_json_str(
            r#"{
                "google_play_package_name": "com.example.in_app_purchase",
                "app_store_bundle_id": "com.example.inAppPurchase",
                "ledger_path": "unused.jsonl"
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn native_update_reaches_the_ledger() {
        let ledger = Arc::new(EntitlementLedgerImpl::in_memory(ProductCatalog::default()));
        let (util, mut receivers) =
            IapUtil::with_validator(Arc::new(AcceptAll), ledger, &config()).unwrap();

        let transaction_id = util
            .submit_native_update(
                Store::GooglePlay,
                r#"{"packageName": "com.example.in_app_purchase", "productId": "gold_100",
                    "purchaseTime": 1690000000000, "purchaseToken": "tok-1"}"#,
            )
            .unwrap();
        util.engine().wait_idle().await;

        assert_eq!(transaction_id.as_str(), "tok-1");
        assert_eq!(util.transaction_state(&transaction_id), TransactionState::Granted);
        let changed = receivers.entitlements.recv().await.unwrap();
        assert_eq!(changed.product_id, "gold_100");
        assert!(util.entitlement("gold_100").is_some());
        assert!(receivers.failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn routes_by_store_and_rejects_untranslatable_updates() {
        let ledger = Arc::new(EntitlementLedgerImpl::in_memory(ProductCatalog::default()));
        let (util, _receivers) =
            IapUtil::with_validator(Arc::new(AcceptAll), ledger, &config()).unwrap();

        // A StoreKit payload is not a Billing purchase.
        let result = util.submit_native_update(
            Store::GooglePlay,
            r#"{"transactionId": "1", "productId": "a", "bundleId": "com.example.inAppPurchase",
                "purchaseDate": 1}"#,
        );
        assert!(matches!(result, Err(IapError::InvalidNativeUpdate(_))));

        // Each store is checked against its own app identifier.
        let result = util.submit_native_update(
            Store::AppStore,
            r#"{"transactionId": "1", "productId": "a", "bundleId": "com.example.in_app_purchase",
                "purchaseDate": 1}"#,
        );
        assert!(matches!(result, Err(IapError::InvalidNativeUpdate(_))));

        util.shutdown().await;
        let result = util.submit_native_update(
            Store::AppStore,
            r#"{"transactionId": "1", "productId": "a", "bundleId": "com.example.inAppPurchase",
                "purchaseDate": 1}"#,
        );
        assert!(matches!(result, Err(IapError::EngineShutDown)));
        assert_eq!(
            util.transaction_state(&TransactionId::from("1")),
            TransactionState::Unseen
        );
    }
}
