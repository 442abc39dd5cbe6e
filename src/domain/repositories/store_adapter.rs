use crate::{
    domain::entities::purchase_event::{PurchaseEvent, Store},
    errors::IapError,
};

/// Maps a store-native purchase update, as handed over by the platform SDK,
/// into a canonical [`PurchaseEvent`].
///
/// Adapters only translate. They do not validate receipts or touch the
/// ledger.
pub trait StoreAdapter: Send + Sync {
    fn store(&self) -> Store;

    fn translate(&self, native_update: &str) -> Result<PurchaseEvent, IapError>;
}
