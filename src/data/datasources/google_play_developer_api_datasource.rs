use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use yup_oauth2::{
    authenticator::DefaultAuthenticator, parse_service_account_key, ServiceAccountAuthenticator,
};

use crate::{
    data::models::google_play_developer_api::{
        product_purchase_model::ProductPurchaseModel,
        subscription_purchase_v2_model::SubscriptionPurchaseV2Model,
    },
    errors::IapError,
};

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/androidpublisher"];

#[async_trait]
pub(crate) trait GooglePlayDeveloperApiDatasource: Send + Sync {
    /// purchases.products.get:
    /// https://developers.google.com/android-publisher/api-ref/rest/v3/purchases.products/get
    ///
    /// packageName:
    ///   The package name of the application the inapp product was sold in (for
    ///   example, 'com.some.thing').
    /// productId:
    ///   The inapp product SKU (for example, 'com.some.thing.inapp1').
    /// token:
    ///   The token provided to the user's device when the inapp product was
    ///   purchased.
    async fn get_product_purchase(
        &self,
        package_name: &str,
        product_id: &str,
        token: &str,
    ) -> Result<ProductPurchaseModel, IapError>;

    /// purchases.subscriptionsv2.get:
    /// https://developers.google.com/android-publisher/api-ref/rest/v3/purchases.subscriptionsv2/get
    ///
    /// packageName:
    ///   The package of the application for which this subscription was
    ///   purchased (for example, 'com.some.thing').
    /// token:
    ///   The token provided to the user's device when the subscription was
    ///   purchased.
    async fn get_subscription_purchase_v2(
        &self,
        package_name: &str,
        token: &str,
    ) -> Result<SubscriptionPurchaseV2Model, IapError>;
}

pub(crate) struct GooglePlayDeveloperApiDatasourceImpl {
    client: reqwest::Client,
    authenticator: DefaultAuthenticator,
}

#[async_trait]
impl GooglePlayDeveloperApiDatasource for GooglePlayDeveloperApiDatasourceImpl {
    async fn get_product_purchase(
        &self,
        package_name: &str,
        product_id: &str,
        token: &str,
    ) -> Result<ProductPurchaseModel, IapError> {
        let url = format!("https://androidpublisher.googleapis.com/androidpublisher/v3/applications/{package_name}/purchases/products/{product_id}/tokens/{token}");
        self.callout(&url, "purchases.products.get").await
    }

    async fn get_subscription_purchase_v2(
        &self,
        package_name: &str,
        token: &str,
    ) -> Result<SubscriptionPurchaseV2Model, IapError> {
        let url = format!("https://androidpublisher.googleapis.com/androidpublisher/v3/applications/{package_name}/purchases/subscriptionsv2/tokens/{token}");
        self.callout(&url, "purchases.subscriptionsv2.get").await
    }
}

impl GooglePlayDeveloperApiDatasourceImpl {
    pub(crate) async fn new(api_key: &str) -> Result<Self, IapError> {
        let key = parse_service_account_key(api_key).map_err(|e| {
            IapError::ApiKeyInvalid(format!("Google Play API key could not be parsed: {e:?}"))
        })?;
        let authenticator = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| {
                IapError::ApiKeyInvalid(format!(
                    "Google Play API service account authenticator could not be built: {e:?}"
                ))
            })?;
        let datasource = Self {
            client: reqwest::Client::new(),
            authenticator,
        };
        // Fail fast on an unusable key rather than on the first purchase.
        datasource.access_token().await?;
        Ok(datasource)
    }

    /// The authenticator caches the token and refreshes it before expiry.
    async fn access_token(&self) -> Result<String, IapError> {
        Ok(self
            .authenticator
            .token(SCOPES)
            .await
            .map_err(|e| {
                IapError::ApiKeyInvalid(format!(
                    "Google Play API service account token could not be built: {e:?}"
                ))
            })?
            .token()
            .ok_or_else(|| {
                IapError::ApiKeyInvalid("Google Play API service account token is empty".into())
            })?
            .to_string())
    }

    async fn callout<T: DeserializeOwned>(
        &self,
        url: &str,
        function_name: &str,
    ) -> Result<T, IapError> {
        let api_error = |details: String, status: Option<u16>| {
            IapError::GooglePlayDeveloperApiError {
                function: function_name.to_owned(),
                details,
                status,
            }
        };

        let response = self
            .client
            .get(url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.access_token().await?),
            )
            .send()
            .await
            .map_err(|e| api_error(format!("callout failed to send: {e:?}"), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(
                format!(
                    "callout returned with {} status code; {}",
                    status,
                    response.text().await.unwrap_or_default()
                ),
                Some(status.as_u16()),
            ));
        }

        response.json().await.map_err(|e| {
            IapError::InvalidResponse(format!(
                "{function_name}: failed to parse callout response: {e:?}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unparseable_key_is_rejected_before_any_callout() {
        let result = GooglePlayDeveloperApiDatasourceImpl::new("not a service account key").await;
        assert!(matches!(result, Err(IapError::ApiKeyInvalid(_))));
    }
}
