use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IapError {
    #[error("Invalid API key: {0}")]
    ApiKeyInvalid(String),

    #[error("Error calling out to Google Play Developer API ({function}): {details}")]
    GooglePlayDeveloperApiError {
        function: String,
        details: String,
        /// HTTP status returned by the API, if the callout got that far.
        status: Option<u16>,
    },

    #[error("Error calling out to App Store Server API ({function}): {details}")]
    AppStoreServerApiError {
        function: String,
        details: String,
        status: Option<u16>,
    },

    #[error("Store API returned an unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Invalid JWS: {0}")]
    InvalidJws(String),

    #[error("Invalid native purchase update: {0}")]
    InvalidNativeUpdate(String),

    #[error("Invalid purchase event: {0}")]
    InvalidPurchaseEvent(String),

    #[error("Ledger journal error: {0}")]
    LedgerJournal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Reconciliation engine has been shut down")]
    EngineShutDown,
}

impl IapError {
    /// Whether a failed store callout is worth retrying.
    ///
    /// Connection failures (no status), request timeouts, throttling, server
    /// errors and credential rejections are transient from the purchase's
    /// point of view. Any other 4xx means the store does not recognise the
    /// purchase.
    pub fn is_transient(&self) -> bool {
        match self {
            IapError::GooglePlayDeveloperApiError { status, .. }
            | IapError::AppStoreServerApiError { status, .. } => match status {
                None => true,
                Some(code) => matches!(code, 401 | 403 | 408 | 429 | 500..=599),
            },
            IapError::ApiKeyInvalid(_) => true,
            _ => false,
        }
    }
}
