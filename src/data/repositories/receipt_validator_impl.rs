use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    data::{
        datasources::{
            app_store_server_api_datasource::AppStoreServerApiDatasource,
            google_play_developer_api_datasource::GooglePlayDeveloperApiDatasource,
            utils::{decode_jws_payload, looks_like_jws},
        },
        models::{
            app_store_server_api::jws_transaction_decoded_payload_model::JwsTransactionDecodedPayloadModel,
            google_play_developer_api::{
                product_purchase_model::{ProductPurchaseModel, PurchaseState},
                subscription_purchase_v2_model::{SubscriptionPurchaseV2Model, SubscriptionState},
            },
        },
    },
    domain::{
        entities::{
            product_catalog::{ProductCatalog, ProductKind},
            purchase_event::{Store, TransactionId},
            validation_result::{ValidationReason, ValidationResult},
        },
        repositories::receipt_validator::ReceiptValidator,
    },
    errors::IapError,
};

/// Validates receipts against the App Store Server API and the Google Play
/// Developer API.
///
/// Whatever can be rejected from the receipt alone is rejected without a
/// network call. A `Valid` result always comes from the store itself.
pub(crate) struct ReceiptValidatorImpl<
    A: AppStoreServerApiDatasource,
    G: GooglePlayDeveloperApiDatasource,
> {
    app_store_server_api_datasource: A,
    google_play_developer_api_datasource: G,
    package_name: String,
    bundle_id: String,
    catalog: ProductCatalog,
}

#[async_trait]
impl<A: AppStoreServerApiDatasource, G: GooglePlayDeveloperApiDatasource> ReceiptValidator
    for ReceiptValidatorImpl<A, G>
{
    async fn validate(
        &self,
        transaction_id: &TransactionId,
        raw_receipt: &str,
        store: Store,
        product_id: &str,
    ) -> ValidationResult {
        let result = match store {
            Store::AppStore => {
                self.validate_app_store(transaction_id, raw_receipt, product_id)
                    .await
            }
            Store::GooglePlay => {
                self.validate_google_play(transaction_id, raw_receipt, product_id)
                    .await
            }
        };
        debug!(
            %transaction_id,
            product_id,
            ?store,
            reason = ?result.reason,
            "receipt validated"
        );
        result
    }
}

impl<A: AppStoreServerApiDatasource, G: GooglePlayDeveloperApiDatasource>
    ReceiptValidatorImpl<A, G>
{
    pub(crate) fn new(
        app_store_server_api_datasource: A,
        google_play_developer_api_datasource: G,
        package_name: String,
        bundle_id: String,
        catalog: ProductCatalog,
    ) -> Self {
        Self {
            app_store_server_api_datasource,
            google_play_developer_api_datasource,
            package_name,
            bundle_id,
            catalog,
        }
    }

    async fn validate_app_store(
        &self,
        transaction_id: &TransactionId,
        raw_receipt: &str,
        product_id: &str,
    ) -> ValidationResult {
        let now = Utc::now();
        let raw_receipt = raw_receipt.trim();
        let store_transaction_id = if looks_like_jws(raw_receipt) {
            let payload: JwsTransactionDecodedPayloadModel = match decode_jws_payload(raw_receipt)
            {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(%transaction_id, error = %e, "undecodable App Store receipt");
                    return malformed(transaction_id);
                }
            };
            // The device-side payload is unverified, so it may only reject.
            if let Some(rejection) =
                self.app_store_verdict(transaction_id, &payload, product_id, now)
            {
                return rejection;
            }
            payload.transaction_id
        } else if !raw_receipt.is_empty() && raw_receipt.chars().all(|c| c.is_ascii_digit()) {
            raw_receipt.to_owned()
        } else {
            return malformed(transaction_id);
        };

        match self
            .app_store_server_api_datasource
            .get_transaction_info(&store_transaction_id)
            .await
        {
            Ok(m) => self
                .app_store_verdict(transaction_id, &m, product_id, now)
                .unwrap_or_else(|| ValidationResult::valid(transaction_id.clone(), m.expires_date)),
            Err(e) => from_callout_error(transaction_id, e),
        }
    }

    /// Negative verdict for a decoded App Store transaction, or `None` if it
    /// is in good standing.
    fn app_store_verdict(
        &self,
        transaction_id: &TransactionId,
        m: &JwsTransactionDecodedPayloadModel,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> Option<ValidationResult> {
        if m.transaction_id != transaction_id.0
            || m.product_id != product_id
            || m.bundle_id != self.bundle_id
        {
            debug!(
                %transaction_id,
                receipt_transaction_id = %m.transaction_id,
                receipt_product_id = %m.product_id,
                receipt_bundle_id = %m.bundle_id,
                "App Store receipt does not match the purchase"
            );
            return Some(malformed(transaction_id));
        }
        if m.is_revoked() {
            return Some(ValidationResult::rejected(
                transaction_id.clone(),
                ValidationReason::Revoked,
            ));
        }
        if m.is_expired_at(now) {
            return Some(ValidationResult::rejected(
                transaction_id.clone(),
                ValidationReason::Expired,
            ));
        }
        None
    }

    async fn validate_google_play(
        &self,
        transaction_id: &TransactionId,
        raw_receipt: &str,
        product_id: &str,
    ) -> ValidationResult {
        // The purchase token doubles as the transaction identity.
        if !is_plausible_purchase_token(raw_receipt) || raw_receipt != transaction_id.0 {
            return malformed(transaction_id);
        }

        match self.catalog.kind_of(product_id) {
            ProductKind::Subscription => match self
                .google_play_developer_api_datasource
                .get_subscription_purchase_v2(&self.package_name, raw_receipt)
                .await
            {
                Ok(m) => subscription_verdict(transaction_id, &m, product_id, Utc::now()),
                Err(e) => from_callout_error(transaction_id, e),
            },
            ProductKind::Consumable | ProductKind::NonConsumable => match self
                .google_play_developer_api_datasource
                .get_product_purchase(&self.package_name, product_id, raw_receipt)
                .await
            {
                Ok(m) => product_verdict(transaction_id, &m),
                Err(e) => from_callout_error(transaction_id, e),
            },
        }
    }
}

fn malformed(transaction_id: &TransactionId) -> ValidationResult {
    ValidationResult::rejected(transaction_id.clone(), ValidationReason::Malformed)
}

fn from_callout_error(transaction_id: &TransactionId, e: IapError) -> ValidationResult {
    if e.is_transient() {
        warn!(%transaction_id, error = %e, "store unreachable");
        ValidationResult::rejected(transaction_id.clone(), ValidationReason::StoreUnreachable)
    } else {
        warn!(%transaction_id, error = %e, "store rejected receipt");
        malformed(transaction_id)
    }
}

fn is_plausible_purchase_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
}

fn product_verdict(transaction_id: &TransactionId, m: &ProductPurchaseModel) -> ValidationResult {
    match m.purchase_state {
        PurchaseState::Purchased => ValidationResult::valid(transaction_id.clone(), None),
        PurchaseState::Canceled => {
            ValidationResult::rejected(transaction_id.clone(), ValidationReason::Revoked)
        }
        PurchaseState::Pending => {
            ValidationResult::rejected(transaction_id.clone(), ValidationReason::Pending)
        }
    }
}

fn subscription_verdict(
    transaction_id: &TransactionId,
    m: &SubscriptionPurchaseV2Model,
    product_id: &str,
    now: DateTime<Utc>,
) -> ValidationResult {
    let Some(expiry) = m.expiry_of(product_id) else {
        debug!(%transaction_id, product_id, "subscription has no line item for product");
        return malformed(transaction_id);
    };
    let rejected = |reason| ValidationResult::rejected(transaction_id.clone(), reason);
    match m.subscription_state {
        SubscriptionState::SubscriptionStateActive
        | SubscriptionState::SubscriptionStateInGracePeriod => {
            ValidationResult::valid(transaction_id.clone(), Some(expiry))
        }
        // Cancelled subscriptions stay entitled until they run out.
        SubscriptionState::SubscriptionStateCanceled if expiry > now => {
            ValidationResult::valid(transaction_id.clone(), Some(expiry))
        }
        SubscriptionState::SubscriptionStateCanceled
        | SubscriptionState::SubscriptionStateExpired
        | SubscriptionState::SubscriptionStateOnHold
        | SubscriptionState::SubscriptionStatePaused => rejected(ValidationReason::Expired),
        SubscriptionState::SubscriptionStatePending => rejected(ValidationReason::Pending),
        SubscriptionState::SubscriptionStatePendingPurchaseCanceled => {
            rejected(ValidationReason::Revoked)
        }
        // Nothing to decide on yet; ask again later.
        SubscriptionState::SubscriptionStateUnspecified | SubscriptionState::Unknown(_) => {
            rejected(ValidationReason::StoreUnreachable)
        }
    }
}
