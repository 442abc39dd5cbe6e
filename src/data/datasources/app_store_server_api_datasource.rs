use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::{
        datasources::utils::decode_jws_payload,
        models::app_store_server_api::{
            jws_transaction_decoded_payload_model::JwsTransactionDecodedPayloadModel,
            transaction_info_response_model::TransactionInfoResponseModel,
        },
    },
    errors::IapError,
};

#[async_trait]
pub(crate) trait AppStoreServerApiDatasource: Send + Sync {
    /// Get Transaction Info:
    /// https://developer.apple.com/documentation/appstoreserverapi/get_transaction_info
    ///
    /// transactionId:
    ///   The identifier of a transaction that belongs to the customer, and
    ///   which may be an original transaction identifier.
    async fn get_transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<JwsTransactionDecodedPayloadModel, IapError>;
}

pub(crate) struct AppStoreServerApiDatasourceImpl {
    client: reqwest::Client,
    api_key: String,
    key_id: String,
    issuer_id: String,
    bundle_id: String,
}

#[async_trait]
impl AppStoreServerApiDatasource for AppStoreServerApiDatasourceImpl {
    async fn get_transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<JwsTransactionDecodedPayloadModel, IapError> {
        let production_url = format!(
            "https://api.storekit.itunes.apple.com/inApps/v1/transactions/{transaction_id}"
        );
        let sandbox_url = format!(
            "https://api.storekit-sandbox.itunes.apple.com/inApps/v1/transactions/{transaction_id}"
        );
        let response_wrapper: TransactionInfoResponseModel = self
            .callout_with_sandbox_fallback(&production_url, &sandbox_url, "GetTransactionInfo")
            .await?;
        decode_jws_payload(&response_wrapper.signed_transaction_info)
    }
}

impl AppStoreServerApiDatasourceImpl {
    pub(crate) fn new(
        api_key: &str,
        key_id: &str,
        issuer_id: &str,
        bundle_id: &str,
    ) -> Result<Self, IapError> {
        let datasource = Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_owned(),
            key_id: key_id.to_owned(),
            issuer_id: issuer_id.to_owned(),
            bundle_id: bundle_id.to_owned(),
        };
        // Fail fast on an unusable key rather than on the first purchase.
        datasource.build_jwt_token()?;
        Ok(datasource)
    }

    /// Tokens are valid for ten minutes, so one is minted per callout.
    fn build_jwt_token(&self) -> Result<String, IapError> {
        // Build header.
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        // Build claims.
        #[derive(Debug, Serialize, Deserialize)]
        struct Claims {
            iss: String,
            iat: usize,
            exp: usize,
            aud: String,
            bid: String,
        }
        let now = chrono::Utc::now();
        let claims = Claims {
            iss: self.issuer_id.clone(),
            iat: now.timestamp() as usize,
            exp: (now + chrono::Duration::minutes(10)).timestamp() as usize,
            aud: "appstoreconnect-v1".to_owned(),
            bid: self.bundle_id.clone(),
        };

        // Build token.
        let key = jsonwebtoken::EncodingKey::from_ec_pem(self.api_key.as_bytes())
            .map_err(|e| IapError::ApiKeyInvalid(format!("App Store API key: {e:?}")))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| IapError::ApiKeyInvalid(format!("failed to build JWT token: {e:?}")))
    }

    async fn callout_with_sandbox_fallback<T: DeserializeOwned>(
        &self,
        production_url: &str,
        sandbox_url: &str,
        function_name: &str,
    ) -> Result<T, IapError> {
        // As per Apple's documentation, try production endpoint first. If it
        // fails, try checking the sandbox.
        //
        // If both fail, we will return the error from the production callout,
        // unless only the sandbox failure was transient: a purchase unknown
        // to production may still be a sandbox one.
        match self.callout(production_url, function_name).await {
            Ok(production_response) => Ok(production_response),
            Err(production_error) => match self.callout(sandbox_url, function_name).await {
                Ok(sandbox_response) => Ok(sandbox_response),
                Err(sandbox_error) => {
                    debug!(
                        %production_error,
                        %sandbox_error,
                        "App Store callout failed in both environments"
                    );
                    if sandbox_error.is_transient() && !production_error.is_transient() {
                        Err(sandbox_error)
                    } else {
                        Err(production_error)
                    }
                }
            },
        }
    }

    async fn callout<T: DeserializeOwned>(
        &self,
        url: &str,
        function_name: &str,
    ) -> Result<T, IapError> {
        let api_error = |details: String, status: Option<u16>| IapError::AppStoreServerApiError {
            function: function_name.to_owned(),
            details,
            status,
        };

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.build_jwt_token()?))
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
