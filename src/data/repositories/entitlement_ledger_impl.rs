use std::{
    collections::HashMap,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    data::{
        datasources::ledger_journal_datasource::{
            LedgerJournalDatasource, LedgerJournalFileDatasource, LedgerJournalMemoryDatasource,
        },
        models::ledger::entitlement_record_model::EntitlementRecordModel,
    },
    domain::{
        entities::{
            entitlement_record::{CommitOutcome, EntitlementRecord, EntitlementState, Transition},
            product_catalog::ProductCatalog,
            purchase_event::TransactionId,
        },
        repositories::entitlement_ledger::EntitlementLedger,
    },
    errors::IapError,
};

#[derive(Default)]
struct LedgerState {
    records: HashMap<TransactionId, EntitlementRecord>,
    /// Product ID -> transaction ID of its single Active record.
    active_by_product: HashMap<String, TransactionId>,
}

/// Journal-backed entitlement ledger.
///
/// Every change is appended to the journal before it is applied in memory,
/// under one write lock, so a commit is linearizable and a failed write leaves
/// the visible state untouched.
pub struct EntitlementLedgerImpl {
    journal: Box<dyn LedgerJournalDatasource>,
    catalog: ProductCatalog,
    state: RwLock<LedgerState>,
}

impl EntitlementLedgerImpl {
    /// Opens (or creates) a ledger backed by the journal file at `path`,
    /// replaying its contents.
    pub fn open(path: &Path, catalog: ProductCatalog) -> Result<Self, IapError> {
        let ledger = Self::with_journal(
            Box::new(LedgerJournalFileDatasource::open(path)?),
            catalog,
        )?;
        info!(
            path = %path.display(),
            records = ledger.read_state().records.len(),
            "entitlement ledger opened"
        );
        Ok(ledger)
    }

    /// A ledger that does not survive the process.
    pub fn in_memory(catalog: ProductCatalog) -> Self {
        Self {
            journal: Box::new(LedgerJournalMemoryDatasource::new()),
            catalog,
            state: RwLock::new(LedgerState::default()),
        }
    }

    fn with_journal(
        journal: Box<dyn LedgerJournalDatasource>,
        catalog: ProductCatalog,
    ) -> Result<Self, IapError> {
        let entries = journal.load()?;
        let state = Self::replay(entries, &catalog);
        Ok(Self {
            journal,
            catalog,
            state: RwLock::new(state),
        })
    }

    /// Rebuilds the in-memory state, last entry per transaction winning.
    ///
    /// A crash between the two appends of a superseding commit can leave two
    /// Active records for one product on disk; the product policy picks the
    /// survivor again here.
    fn replay(entries: Vec<EntitlementRecordModel>, catalog: &ProductCatalog) -> LedgerState {
        let mut state = LedgerState::default();
        for entry in entries {
            let record = entry.into_record();
            state.records.insert(record.transaction_id.clone(), record);
        }

        let mut active: Vec<&EntitlementRecord> =
            state.records.values().filter(|r| r.is_active()).collect();
        active.sort_by(|a, b| {
            a.granted_at
                .cmp(&b.granted_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        let mut demoted = Vec::new();
        for record in active {
            let supersedes = catalog.kind_of(&record.product_id).later_grant_supersedes();
            match state.active_by_product.get(&record.product_id) {
                Some(current) if supersedes => {
                    demoted.push(current.clone());
                    state
                        .active_by_product
                        .insert(record.product_id.clone(), record.transaction_id.clone());
                }
                Some(_) => demoted.push(record.transaction_id.clone()),
                None => {
                    state
                        .active_by_product
                        .insert(record.product_id.clone(), record.transaction_id.clone());
                }
            }
        }
        for transaction_id in demoted {
            warn!(%transaction_id, "demoting duplicate active record found during replay");
            if let Some(record) = state.records.get_mut(&transaction_id) {
                record.state = EntitlementState::Expired;
            }
        }
        state
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, record: &EntitlementRecord) -> Result<(), IapError> {
        self.journal
            .append(&EntitlementRecordModel::from_record(record, Utc::now()))
    }

    fn transition(
        &self,
        transaction_id: &TransactionId,
        target: EntitlementState,
    ) -> Result<Option<Transition>, IapError> {
        let mut state = self.write_state();
        let Some(existing) = state.records.get(transaction_id) else {
            return Ok(None);
        };
        if !existing.is_active() {
            return Ok(Some(Transition {
                record: existing.clone(),
                changed: false,
            }));
        }

        let mut record = existing.clone();
        record.state = target;
        self.persist(&record)?;

        if state.active_by_product.get(&record.product_id) == Some(transaction_id) {
            state.active_by_product.remove(&record.product_id);
        }
        state
            .records
            .insert(transaction_id.clone(), record.clone());
        debug!(%transaction_id, state = ?target, "entitlement transitioned");
        Ok(Some(Transition {
            record,
            changed: true,
        }))
    }
}

impl EntitlementLedger for EntitlementLedgerImpl {
    fn commit(
        &self,
        transaction_id: &TransactionId,
        product_id: &str,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CommitOutcome, IapError> {
        let mut state = self.write_state();
        if let Some(existing) = state.records.get(transaction_id) {
            return Ok(CommitOutcome {
                record: existing.clone(),
                changed: false,
                superseded: None,
            });
        }

        let current = state
            .active_by_product
            .get(product_id)
            .and_then(|id| state.records.get(id))
            .cloned();
        let supersedes = self.catalog.kind_of(product_id).later_grant_supersedes();
        let (new_state, superseded) = match current {
            None => (EntitlementState::Active, None),
            Some(mut current) if supersedes && granted_at >= current.granted_at => {
                current.state = EntitlementState::Expired;
                (EntitlementState::Active, Some(current))
            }
            // Arrived out of order, or a repeat grant of a non-consumable.
            Some(_) => (EntitlementState::Expired, None),
        };
        let record = EntitlementRecord {
            product_id: product_id.to_owned(),
            transaction_id: transaction_id.clone(),
            granted_at,
            state: new_state,
            expires_at,
        };

        self.persist(&record)?;
        if let Some(superseded) = &superseded {
            self.persist(superseded)?;
        }

        if let Some(superseded) = &superseded {
            state
                .records
                .insert(superseded.transaction_id.clone(), superseded.clone());
        }
        if record.is_active() {
            state
                .active_by_product
                .insert(product_id.to_owned(), transaction_id.clone());
        }
        state
            .records
            .insert(transaction_id.clone(), record.clone());
        debug!(
            %transaction_id,
            product_id,
            state = ?record.state,
            superseded = ?superseded.as_ref().map(|r| &r.transaction_id),
            "entitlement committed"
        );
        Ok(CommitOutcome {
            record,
            changed: true,
            superseded,
        })
    }

    fn revoke(&self, transaction_id: &TransactionId) -> Result<Option<Transition>, IapError> {
        self.transition(transaction_id, EntitlementState::Revoked)
    }

    fn expire(&self, transaction_id: &TransactionId) -> Result<Option<Transition>, IapError> {
        self.transition(transaction_id, EntitlementState::Expired)
    }

    fn query(&self, product_id: &str) -> Option<EntitlementRecord> {
        let state = self.read_state();
        state
            .active_by_product
            .get(product_id)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    fn get(&self, transaction_id: &TransactionId) -> Option<EntitlementRecord> {
        self.read_state().records.get(transaction_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::entities::product_catalog::ProductKind;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn txn(id: &str) -> TransactionId {
        TransactionId(id.to_string())
    }

    fn catalog() -> ProductCatalog {
        ProductCatalog::new()
            .with_product("gold_100", ProductKind::Consumable)
            .with_product("remove_ads", ProductKind::NonConsumable)
            .with_product("pro_monthly", ProductKind::Subscription)
    }

    struct FailingJournal {
        fail: AtomicBool,
        inner: LedgerJournalMemoryDatasource,
    }

    impl LedgerJournalDatasource for FailingJournal {
        fn load(&self) -> Result<Vec<EntitlementRecordModel>, IapError> {
            self.inner.load()
        }

        fn append(&self, entry: &EntitlementRecordModel) -> Result<(), IapError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IapError::LedgerJournal("disk full".into()));
            }
            self.inner.append(entry)
        }
    }

    #[test]
    fn commit_is_idempotent() {
        let ledger = EntitlementLedgerImpl::in_memory(catalog());
        let first = ledger.commit(&txn("T1"), "gold_100", at(0), None).unwrap();
        assert!(first.changed);
        assert_eq!(first.record.state, EntitlementState::Active);

        let second = ledger.commit(&txn("T1"), "gold_100", at(5), None).unwrap();
        assert!(!second.changed);
        assert_eq!(second.record, first.record);
        assert_eq!(ledger.query("gold_100").unwrap().transaction_id, txn("T1"));
    }

    #[test]
    fn later_consumable_grant_supersedes_earlier() {
        let ledger = EntitlementLedgerImpl::in_memory(catalog());
        ledger.commit(&txn("T1"), "gold_100", at(0), None).unwrap();
        let outcome = ledger.commit(&txn("T2"), "gold_100", at(1), None).unwrap();

        assert_eq!(outcome.record.state, EntitlementState::Active);
        let superseded = outcome.superseded.unwrap();
        assert_eq!(superseded.transaction_id, txn("T1"));
        assert_eq!(superseded.state, EntitlementState::Expired);
        assert_eq!(ledger.get(&txn("T1")).unwrap().state, EntitlementState::Expired);
        assert_eq!(ledger.query("gold_100").unwrap().transaction_id, txn("T2"));
    }

    #[test]
    fn out_of_order_subscription_grant_is_stored_expired() {
        let ledger = EntitlementLedgerImpl::in_memory(catalog());
        let expiry = Some(at(0) + Duration::days(30));
        ledger.commit(&txn("T2"), "pro_monthly", at(10), expiry).unwrap();
        let outcome = ledger.commit(&txn("T1"), "pro_monthly", at(0), None).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.record.state, EntitlementState::Expired);
        assert!(outcome.superseded.is_none());
        let active = ledger.query("pro_monthly").unwrap();
        assert_eq!(active.transaction_id, txn("T2"));
        assert_eq!(active.expires_at, expiry);
    }

    #[test]
    fn non_consumable_keeps_first_grant() {
        let ledger = EntitlementLedgerImpl::in_memory(catalog());
        ledger.commit(&txn("T1"), "remove_ads", at(0), None).unwrap();
        let outcome = ledger.commit(&txn("T2"), "remove_ads", at(5), None).unwrap();
        assert_eq!(outcome.record.state, EntitlementState::Expired);
        assert_eq!(ledger.query("remove_ads").unwrap().transaction_id, txn("T1"));
    }

    #[test]
    fn revoke_only_moves_active_records() {
        let ledger = EntitlementLedgerImpl::in_memory(catalog());
        assert!(ledger.revoke(&txn("missing")).unwrap().is_none());

        ledger.commit(&txn("T1"), "gold_100", at(0), None).unwrap();
        let revoked = ledger.revoke(&txn("T1")).unwrap().unwrap();
        assert!(revoked.changed);
        assert_eq!(revoked.record.state, EntitlementState::Revoked);
        assert!(ledger.query("gold_100").is_none());

        let again = ledger.revoke(&txn("T1")).unwrap().unwrap();
        assert!(!again.changed);
        let expire = ledger.expire(&txn("T1")).unwrap().unwrap();
        assert!(!expire.changed);
        assert_eq!(expire.record.state, EntitlementState::Revoked);
    }

    #[test]
    fn failed_journal_write_leaves_state_untouched() {
        let journal = FailingJournal {
            fail: AtomicBool::new(true),
            inner: LedgerJournalMemoryDatasource::new(),
        };
        let ledger = EntitlementLedgerImpl::with_journal(Box::new(journal), catalog()).unwrap();
        assert!(matches!(
            ledger.commit(&txn("T1"), "gold_100", at(0), None),
            Err(IapError::LedgerJournal(_))
        ));
        assert!(ledger.get(&txn("T1")).is_none());
        assert!(ledger.query("gold_100").is_none());
    }

    #[test]
    fn reopening_replays_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let ledger = EntitlementLedgerImpl::open(&path, catalog()).unwrap();
            ledger.commit(&txn("T1"), "gold_100", at(0), None).unwrap();
            ledger.commit(&txn("T2"), "gold_100", at(1), None).unwrap();
            ledger.commit(&txn("T3"), "remove_ads", at(2), None).unwrap();
            ledger.revoke(&txn("T3")).unwrap();
        }
        let ledger = EntitlementLedgerImpl::open(&path, catalog()).unwrap();
        assert_eq!(ledger.get(&txn("T1")).unwrap().state, EntitlementState::Expired);
        assert_eq!(ledger.query("gold_100").unwrap().transaction_id, txn("T2"));
        assert_eq!(ledger.get(&txn("T3")).unwrap().state, EntitlementState::Revoked);
        assert!(ledger.query("remove_ads").is_none());
        assert!(!ledger.commit(&txn("T2"), "gold_100", at(9), None).unwrap().changed);
    }

    #[test]
    fn replay_repairs_duplicate_actives() {
        let journal = LedgerJournalMemoryDatasource::new();
        for (id, minute) in [("T1", 0), ("T2", 1)] {
            let record = EntitlementRecord {
                product_id: "gold_100".into(),
                transaction_id: txn(id),
                granted_at: at(minute),
                state: EntitlementState::Active,
                expires_at: None,
            };
            journal
                .append(&EntitlementRecordModel::from_record(&record, Utc::now()))
                .unwrap();
        }
        let ledger = EntitlementLedgerImpl::with_journal(Box::new(journal), catalog()).unwrap();
        assert_eq!(ledger.query("gold_100").unwrap().transaction_id, txn("T2"));
        assert_eq!(ledger.get(&txn("T1")).unwrap().state, EntitlementState::Expired);
    }

    #[test]
    fn concurrent_commits_of_one_transaction_grant_once() {
        let ledger = Arc::new(EntitlementLedgerImpl::in_memory(catalog()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger
                        .commit(&txn("T1"), "gold_100", at(0), None)
                        .unwrap()
                        .changed
                })
            })
            .collect();
        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();
        assert_eq!(changed, 1);
    }
}
