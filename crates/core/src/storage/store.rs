use crate::domain::recommendation::{
    ExitEvent, ExitReason, RecKind, Recommendation, RecommendationDraft, RecommendationPatch,
};
use crate::storage::error::StoreError;
use anyhow::ensure;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence seam behind the store. The production implementation writes
/// to Postgres; tests swap in an in-memory one.
#[async_trait::async_trait]
pub trait RecommendationBackend: Send + Sync {
    /// All records of both kinds, most recent first.
    async fn load_all(&self) -> anyhow::Result<Vec<Recommendation>>;

    async fn insert(&self, rec: &Recommendation) -> anyhow::Result<()>;

    /// Writes the full record, compare-and-swapped on the version the writer
    /// started from. `Ok(false)` means no row matched (concurrent edit or
    /// concurrent delete).
    async fn update(&self, rec: &Recommendation, expected_version: i64) -> anyhow::Result<bool>;

    async fn delete(&self, kind: RecKind, id: Uuid) -> anyhow::Result<()>;
}

/// Canonical mutable collection of recommendations. Every mutation is
/// persisted through the backend first; the in-memory read model is only
/// touched after the write is confirmed, so a failed write leaves it
/// unchanged.
pub struct RecommendationStore {
    backend: Arc<dyn RecommendationBackend>,
    records: Vec<Recommendation>,
}

impl RecommendationStore {
    pub async fn load(backend: Arc<dyn RecommendationBackend>) -> Result<Self, StoreError> {
        let mut records = backend.load_all().await.map_err(StoreError::Storage)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tracing::debug!(count = records.len(), "loaded recommendation read model");
        Ok(Self { backend, records })
    }

    /// Most-recent-first.
    pub fn list(&self) -> &[Recommendation] {
        &self.records
    }

    pub fn get(&self, id: Uuid) -> Option<&Recommendation> {
        self.records.iter().find(|r| r.id == id)
    }

    pub async fn create(
        &mut self,
        draft: RecommendationDraft,
    ) -> Result<Recommendation, StoreError> {
        let rec = draft
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .map_err(StoreError::validation)?;
        self.backend
            .insert(&rec)
            .await
            .map_err(StoreError::Storage)?;
        self.records.insert(0, rec.clone());
        Ok(rec)
    }

    pub async fn update(
        &mut self,
        id: Uuid,
        patch: &RecommendationPatch,
        expected_version: Option<i64>,
    ) -> Result<Recommendation, StoreError> {
        let idx = self.position(id, expected_version)?;
        let next = self.records[idx]
            .apply_patch(patch)
            .map_err(StoreError::validation)?;
        self.commit(idx, next).await
    }

    pub async fn update_current_price(
        &mut self,
        id: Uuid,
        price: f64,
        expected_version: Option<i64>,
    ) -> Result<Recommendation, StoreError> {
        // Short-circuit before touching anything; never persist a corrupt price.
        (|| -> anyhow::Result<()> {
            ensure!(price.is_finite(), "price must be a finite number");
            ensure!(price > 0.0, "price must be positive (got {price})");
            Ok(())
        })()
        .map_err(StoreError::validation)?;

        let idx = self.position(id, expected_version)?;
        let mut next = self.records[idx].clone();
        next.current_price = price;
        self.commit(idx, next).await
    }

    /// One-shot terminal exit: reason, optional price, and timestamp land in
    /// a single atomic merge.
    pub async fn exit(
        &mut self,
        id: Uuid,
        reason: ExitReason,
        exit_price: Option<f64>,
        expected_version: Option<i64>,
    ) -> Result<Recommendation, StoreError> {
        let idx = self.position(id, expected_version)?;
        let current = &self.records[idx];

        if current.exit.is_some() {
            return Err(StoreError::Validation(format!(
                "recommendation {id} is already exited"
            )));
        }
        if reason.requires_exit_price() && exit_price.is_none() {
            return Err(StoreError::Validation(format!(
                "{} requires an exit price",
                reason.as_str()
            )));
        }

        let mut next = current.clone();
        next.exit = Some(ExitEvent {
            reason,
            // The price is meaningless outside partial exits; drop it there.
            price: if reason.requires_exit_price() {
                exit_price
            } else {
                None
            },
            at: Utc::now(),
        });
        // Catches the rest: positive price, TARGET_3_HIT on a swing record.
        next.validate().map_err(StoreError::validation)?;
        self.commit(idx, next).await
    }

    /// Idempotent at this boundary: deleting an absent id is a no-op.
    pub async fn delete(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let Some(idx) = self.records.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let kind = self.records[idx].kind;
        self.backend
            .delete(kind, id)
            .await
            .map_err(StoreError::Storage)?;
        self.records.remove(idx);
        Ok(true)
    }

    fn position(&self, id: Uuid, expected_version: Option<i64>) -> Result<usize, StoreError> {
        let idx = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if let Some(expected) = expected_version {
            if self.records[idx].version != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected_version: expected,
                });
            }
        }
        Ok(idx)
    }

    async fn commit(
        &mut self,
        idx: usize,
        mut next: Recommendation,
    ) -> Result<Recommendation, StoreError> {
        let prev_version = self.records[idx].version;
        next.version = prev_version + 1;
        next.updated_at = Utc::now();

        let matched = self
            .backend
            .update(&next, prev_version)
            .await
            .map_err(StoreError::Storage)?;
        if !matched {
            tracing::warn!(
                id = %next.id,
                expected_version = prev_version,
                "persisted row did not match; concurrent edit lost the write"
            );
            return Err(StoreError::Conflict {
                id: next.id,
                expected_version: prev_version,
            });
        }

        self.records[idx] = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{Status, TradeSide};
    use std::sync::Mutex;

    /// Backing vec guarded by a plain mutex; never held across an await.
    #[derive(Default)]
    struct MemoryBackend {
        rows: Mutex<Vec<Recommendation>>,
    }

    #[async_trait::async_trait]
    impl RecommendationBackend for MemoryBackend {
        async fn load_all(&self) -> anyhow::Result<Vec<Recommendation>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn insert(&self, rec: &Recommendation) -> anyhow::Result<()> {
            self.rows.lock().unwrap().push(rec.clone());
            Ok(())
        }

        async fn update(
            &self,
            rec: &Recommendation,
            expected_version: i64,
        ) -> anyhow::Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows
                .iter_mut()
                .find(|r| r.id == rec.id && r.version == expected_version)
            {
                Some(row) => {
                    *row = rec.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete(&self, _kind: RecKind, id: Uuid) -> anyhow::Result<()> {
            self.rows.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }

    /// Insert/update always fail; used to prove memory stays untouched.
    struct FailingBackend;

    #[async_trait::async_trait]
    impl RecommendationBackend for FailingBackend {
        async fn load_all(&self) -> anyhow::Result<Vec<Recommendation>> {
            Ok(Vec::new())
        }

        async fn insert(&self, _rec: &Recommendation) -> anyhow::Result<()> {
            anyhow::bail!("backend down")
        }

        async fn update(
            &self,
            _rec: &Recommendation,
            _expected_version: i64,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("backend down")
        }

        async fn delete(&self, _kind: RecKind, _id: Uuid) -> anyhow::Result<()> {
            anyhow::bail!("backend down")
        }
    }

    fn draft(symbol: &str) -> RecommendationDraft {
        RecommendationDraft {
            kind: RecKind::Intraday,
            stock_symbol: symbol.to_string(),
            trade_side: TradeSide::Buy,
            entry_price: 100.0,
            targets: vec![110.0, 120.0, 130.0],
            stoploss: 95.0,
            allocation: None,
            notes: None,
            image_ref: None,
        }
    }

    async fn store() -> RecommendationStore {
        RecommendationStore::load(Arc::new(MemoryBackend::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_prepends_to_the_list() {
        let mut store = store().await;
        let a = store.create(draft("AAA")).await.unwrap();
        let b = store.create(draft("BBB")).await.unwrap();

        let ids: Vec<Uuid> = store.list().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(store.get(a.id).unwrap().stock_symbol, "AAA");
    }

    #[tokio::test]
    async fn create_rejects_invalid_draft_without_persisting() {
        let mut store = store().await;
        let mut d = draft("AAA");
        d.entry_price = 0.0;
        let err = store.create(d).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn update_merges_and_bumps_version() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();

        let updated = store
            .update(
                rec.id,
                &RecommendationPatch {
                    stoploss: Some(96.0),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(updated.stoploss, 96.0);
        assert_eq!(updated.version, rec.version + 1);
        assert!(updated.updated_at >= rec.updated_at);
        assert_eq!(store.get(rec.id).unwrap().stoploss, 96.0);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let mut store = store().await;
        let err = store
            .update(Uuid::new_v4(), &RecommendationPatch::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();
        store
            .update_current_price(rec.id, 101.0, None)
            .await
            .unwrap();

        // Second writer still holds version 1.
        let err = store
            .update_current_price(rec.id, 102.0, Some(rec.version))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get(rec.id).unwrap().current_price, 101.0);
    }

    #[tokio::test]
    async fn non_positive_price_is_rejected_before_any_write() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();

        for bad in [0.0, -10.0, f64::NAN] {
            let err = store
                .update_current_price(rec.id, bad, None)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
        let current = store.get(rec.id).unwrap();
        assert_eq!(current.current_price, 100.0);
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn exit_sets_all_exit_fields_atomically() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();

        let exited = store
            .exit(rec.id, ExitReason::Target1Hit, None, None)
            .await
            .unwrap();
        assert_eq!(exited.status(), Status::Exit);
        let exit = exited.exit.unwrap();
        assert_eq!(exit.reason, ExitReason::Target1Hit);
        assert_eq!(exit.price, None);
        assert_eq!(exited.updated_at, store.get(rec.id).unwrap().updated_at);
    }

    #[tokio::test]
    async fn exit_is_one_shot() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();
        store
            .exit(rec.id, ExitReason::Target1Hit, None, None)
            .await
            .unwrap();

        let err = store
            .exit(rec.id, ExitReason::StoplossHit, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn partial_exit_requires_a_price() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();

        let err = store
            .exit(rec.id, ExitReason::PartialLoss, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.get(rec.id).unwrap().status(), Status::Open);

        let exited = store
            .exit(rec.id, ExitReason::PartialLoss, Some(95.0), None)
            .await
            .unwrap();
        assert_eq!(exited.exit.unwrap().price, Some(95.0));
    }

    #[tokio::test]
    async fn price_supplied_to_non_partial_exit_is_dropped() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();
        let exited = store
            .exit(rec.id, ExitReason::Target2Hit, Some(119.0), None)
            .await
            .unwrap();
        assert_eq!(exited.exit.unwrap().price, None);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_permanent() {
        let mut store = store().await;
        let rec = store.create(draft("AAA")).await.unwrap();

        assert!(store.delete(rec.id).await.unwrap());
        assert!(store.get(rec.id).is_none());
        assert!(store.list().is_empty());
        assert!(!store.delete(rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let mut store = RecommendationStore::load(Arc::new(FailingBackend))
            .await
            .unwrap();
        let err = store.create(draft("AAA")).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn failed_update_keeps_previous_record() {
        let memory = Arc::new(MemoryBackend::default());
        let mut store = RecommendationStore::load(memory.clone()).await.unwrap();
        let rec = store.create(draft("AAA")).await.unwrap();

        // Simulate the row vanishing under us: backend CAS misses.
        memory.rows.lock().unwrap().clear();
        let err = store
            .update_current_price(rec.id, 105.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get(rec.id).unwrap().current_price, 100.0);
        assert_eq!(store.get(rec.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn load_orders_most_recent_first() {
        let memory = Arc::new(MemoryBackend::default());
        {
            let mut seed = RecommendationStore::load(memory.clone()).await.unwrap();
            seed.create(draft("AAA")).await.unwrap();
            seed.create(draft("BBB")).await.unwrap();
        }
        let store = RecommendationStore::load(memory).await.unwrap();
        assert_eq!(store.list().len(), 2);
        assert!(store.list()[0].created_at >= store.list()[1].created_at);
    }
}
