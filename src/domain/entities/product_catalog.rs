use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a product behaves once granted.
///
/// Decides which Google Play endpoint verifies the purchase, and which grant
/// wins when two transactions for the same product are both valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Consumable,
    NonConsumable,
    Subscription,
}

impl ProductKind {
    /// Later grants replace earlier ones for consumables and subscriptions;
    /// a non-consumable keeps its first grant.
    pub fn later_grant_supersedes(&self) -> bool {
        match self {
            ProductKind::Consumable | ProductKind::Subscription => true,
            ProductKind::NonConsumable => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCatalog(HashMap<String, ProductKind>);

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: impl Into<String>, kind: ProductKind) -> Self {
        self.0.insert(product_id.into(), kind);
        self
    }

    /// Unknown products are treated as consumables.
    pub fn kind_of(&self, product_id: &str) -> ProductKind {
        self.0
            .get(product_id)
            .copied()
            .unwrap_or(ProductKind::Consumable)
    }
}
