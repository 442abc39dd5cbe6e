use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::IapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Store {
    GooglePlay,
    AppStore,
}

/// Store-assigned identity of a purchase, stable across redelivery.
///
/// For Google Play this is the purchase token. For the App Store it is the
/// transaction ID (each subscription renewal is its own transaction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A purchase update in canonical form, as produced by a store adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEvent {
    transaction_id: TransactionId,
    product_id: String,
    store: Store,
    raw_receipt: String,
    purchase_time: DateTime<Utc>,
    quantity: u32,
}

impl PurchaseEvent {
    pub fn new(
        transaction_id: TransactionId,
        product_id: impl Into<String>,
        store: Store,
        raw_receipt: impl Into<String>,
        purchase_time: DateTime<Utc>,
        quantity: u32,
    ) -> Result<Self, IapError> {
        let product_id = product_id.into();
        if transaction_id.0.trim().is_empty() {
            return Err(IapError::InvalidPurchaseEvent(
                "transaction ID is empty".into(),
            ));
        }
        if product_id.trim().is_empty() {
            return Err(IapError::InvalidPurchaseEvent(format!(
                "product ID is empty (transaction {transaction_id})"
            )));
        }
        if quantity == 0 {
            return Err(IapError::InvalidPurchaseEvent(format!(
                "quantity is zero (transaction {transaction_id})"
            )));
        }
        Ok(Self {
            transaction_id,
            product_id,
            store,
            raw_receipt: raw_receipt.into(),
            purchase_time,
            quantity,
        })
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn store(&self) -> Store {
        self.store
    }

    pub fn raw_receipt(&self) -> &str {
        &self.raw_receipt
    }

    pub fn purchase_time(&self) -> DateTime<Utc> {
        self.purchase_time
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_incomplete_events() {
        let now = Utc::now();
        assert!(PurchaseEvent::new("".into(), "gold_100", Store::GooglePlay, "r", now, 1).is_err());
        assert!(PurchaseEvent::new("T1".into(), " ", Store::GooglePlay, "r", now, 1).is_err());
        assert!(PurchaseEvent::new("T1".into(), "gold_100", Store::GooglePlay, "r", now, 0).is_err());

        let event =
            PurchaseEvent::new("T1".into(), "gold_100", Store::GooglePlay, "r", now, 2).unwrap();
        assert_eq!(event.transaction_id().as_str(), "T1");
        assert_eq!(event.quantity(), 2);
    }
}
