//! 内存存储
//!
//! 用于测试和单进程运行；`JsonlStore` 在它之上增加落盘能力。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RunStore;
use crate::error::{AppResult, StoreError};
use crate::models::{
    ArtifactKind, Batch, BatchScope, BatchStatus, ProgressDelta, QuestionRun, RunKey,
    UsageLedgerEntry,
};

/// 对存储的一次修改，也是 JSONL 文件中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    BatchCreated { batch: Batch },
    BatchUpdated { batch: Batch },
    RunInserted { run: QuestionRun },
    ArtifactPut { run_id: Uuid, kind: ArtifactKind },
    ArtifactsCleared { run_id: Uuid },
    UsageInserted { entry: UsageLedgerEntry },
    UsageToppedUp { entry: UsageLedgerEntry },
}

#[derive(Debug, Default)]
struct State {
    batches: HashMap<Uuid, Batch>,
    runs: HashMap<RunKey, QuestionRun>,
    artifacts: HashMap<Uuid, BTreeSet<ArtifactKind>>,
    usage: HashMap<(Uuid, String), UsageLedgerEntry>,
}

impl State {
    fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::BatchCreated { batch } => {
                for other in self.batches.values_mut() {
                    if other.scope == batch.scope {
                        other.is_latest = false;
                    }
                }
                self.batches.insert(batch.id, batch);
            }
            StoreEvent::BatchUpdated { batch } => {
                self.batches.insert(batch.id, batch);
            }
            StoreEvent::RunInserted { run } => {
                self.runs.insert(run.key(), run);
            }
            StoreEvent::ArtifactPut { run_id, kind } => {
                self.artifacts.entry(run_id).or_default().insert(kind);
            }
            StoreEvent::ArtifactsCleared { run_id } => {
                self.artifacts.remove(&run_id);
            }
            StoreEvent::UsageInserted { entry } | StoreEvent::UsageToppedUp { entry } => {
                self.usage
                    .insert((entry.batch_id, entry.scope_key.clone()), entry);
            }
        }
    }

    fn batch_mut(&mut self, batch_id: Uuid) -> AppResult<&mut Batch> {
        self.batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()).into())
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重放事件（用于从文件恢复）
    pub(crate) async fn replay(&self, events: impl IntoIterator<Item = StoreEvent>) {
        let mut state = self.state.write().await;
        for event in events {
            state.apply(event);
        }
    }

    /// 所有批次，按创建时间排序
    pub async fn batches(&self, scope: &BatchScope) -> Vec<Batch> {
        let state = self.state.read().await;
        let mut batches: Vec<Batch> = state
            .batches
            .values()
            .filter(|b| &b.scope == scope)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.created_at);
        batches
    }

    async fn update_batch(
        &self,
        batch_id: Uuid,
        f: impl FnOnce(&mut Batch) + Send,
    ) -> AppResult<Batch> {
        let mut state = self.state.write().await;
        let batch = state.batch_mut(batch_id)?;
        f(batch);
        Ok(batch.clone())
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn find_batch_since(
        &self,
        scope: &BatchScope,
        since: DateTime<Utc>,
    ) -> AppResult<Option<Batch>> {
        let state = self.state.read().await;
        Ok(state
            .batches
            .values()
            .filter(|b| &b.scope == scope && b.created_at >= since)
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn insert_batch(&self, batch: Batch) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.apply(StoreEvent::BatchCreated { batch });
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Batch> {
        let state = self.state.read().await;
        state
            .batches
            .get(&batch_id)
            .cloned()
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()).into())
    }

    async fn mark_batch_running(&self, batch_id: Uuid, now: DateTime<Utc>) -> AppResult<Batch> {
        self.update_batch(batch_id, |b| {
            b.status = BatchStatus::Running;
            b.started_at = Some(now);
        })
        .await
    }

    async fn finish_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Batch> {
        self.update_batch(batch_id, |b| {
            b.status = status;
            b.completed_at = Some(now);
        })
        .await
    }

    async fn record_progress(&self, batch_id: Uuid, delta: ProgressDelta) -> AppResult<Batch> {
        self.update_batch(batch_id, |b| {
            b.completed_questions += delta.completed;
            b.failed_questions += delta.failed;
        })
        .await
    }

    async fn find_run(&self, key: &RunKey) -> AppResult<Option<QuestionRun>> {
        let state = self.state.read().await;
        Ok(state.runs.get(key).cloned())
    }

    async fn insert_run(&self, run: QuestionRun) -> AppResult<()> {
        let mut state = self.state.write().await;
        let key = run.key();
        if state.runs.contains_key(&key) {
            return Err(StoreError::DuplicateRun(key.to_string()).into());
        }
        state.apply(StoreEvent::RunInserted { run });
        Ok(())
    }

    async fn runs_for_batch(&self, batch_id: Uuid) -> AppResult<Vec<QuestionRun>> {
        let state = self.state.read().await;
        let mut runs: Vec<QuestionRun> = state
            .runs
            .values()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn artifacts_for_run(&self, run_id: Uuid) -> AppResult<BTreeSet<ArtifactKind>> {
        let state = self.state.read().await;
        Ok(state.artifacts.get(&run_id).cloned().unwrap_or_default())
    }

    async fn put_artifact(&self, run_id: Uuid, kind: ArtifactKind) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.apply(StoreEvent::ArtifactPut { run_id, kind });
        Ok(())
    }

    async fn clear_artifacts(&self, run_id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.apply(StoreEvent::ArtifactsCleared { run_id });
        Ok(())
    }

    async fn find_usage(
        &self,
        batch_id: Uuid,
        scope_key: &str,
    ) -> AppResult<Option<UsageLedgerEntry>> {
        let state = self.state.read().await;
        Ok(state.usage.get(&(batch_id, scope_key.to_string())).cloned())
    }

    async fn insert_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry> {
        let mut state = self.state.write().await;
        let key = (entry.batch_id, entry.scope_key.clone());
        if let Some(existing) = state.usage.get(&key) {
            return Ok(existing.clone());
        }
        state.apply(StoreEvent::UsageInserted {
            entry: entry.clone(),
        });
        Ok(entry)
    }

    async fn top_up_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry> {
        let mut state = self.state.write().await;
        let key = (entry.batch_id, entry.scope_key.clone());
        if let Some(existing) = state.usage.get(&key) {
            if existing.charged_run_ids.is_superset(&entry.charged_run_ids) {
                return Ok(existing.clone());
            }
        }
        state.apply(StoreEvent::UsageToppedUp {
            entry: entry.clone(),
        });
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use chrono::Duration;

    fn sample_run(batch_id: Uuid, question_id: &str) -> QuestionRun {
        QuestionRun {
            id: Uuid::new_v4(),
            batch_id,
            question_id: question_id.to_string(),
            model: "chatgpt".into(),
            location: Location::country("US"),
            response_text: "answer".into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0015,
            citations: vec![],
            websearch: true,
            usable: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_run_rejected() {
        let store = InMemoryStore::new();
        let batch_id = Uuid::new_v4();
        store.insert_run(sample_run(batch_id, "q1")).await.unwrap();

        let err = store
            .insert_run(sample_run(batch_id, "q1"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_run());
        assert_eq!(store.runs_for_batch(batch_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_batch_clears_latest_flag() {
        let store = InMemoryStore::new();
        let scope = BatchScope::Org("acme".into());
        let old = Batch::new(scope.clone(), 3, Utc::now() - Duration::days(1));
        let old_id = old.id;
        store.insert_batch(old).await.unwrap();
        store
            .insert_batch(Batch::new(scope.clone(), 3, Utc::now()))
            .await
            .unwrap();

        let batches = store.batches(&scope).await;
        assert_eq!(batches.len(), 2);
        assert!(!store.get_batch(old_id).await.unwrap().is_latest);
        assert!(batches[1].is_latest);
    }

    #[tokio::test]
    async fn test_record_progress_accumulates() {
        let store = InMemoryStore::new();
        let batch = Batch::new(BatchScope::Network("all".into()), 5, Utc::now());
        let id = batch.id;
        store.insert_batch(batch).await.unwrap();

        let delta = ProgressDelta {
            completed: 1,
            failed: 0,
        };
        for _ in 0..3 {
            store.record_progress(id, delta).await.unwrap();
        }
        let failed = ProgressDelta {
            completed: 0,
            failed: 1,
        };
        let batch = store.record_progress(id, failed).await.unwrap();
        assert_eq!(batch.completed_questions, 3);
        assert_eq!(batch.failed_questions, 1);
    }

    #[tokio::test]
    async fn test_usage_insert_is_idempotent() {
        let store = InMemoryStore::new();
        let batch_id = Uuid::new_v4();
        let first = UsageLedgerEntry {
            id: Uuid::new_v4(),
            batch_id,
            scope_key: "org:acme".into(),
            run_count: 3,
            amount: 0.0045,
            charged_run_ids: (0..3).map(|_| Uuid::new_v4()).collect(),
            charged_at: Utc::now(),
        };
        let mut second = first.clone();
        second.id = Uuid::new_v4();
        second.amount = 99.0;

        store.insert_usage(first.clone()).await.unwrap();
        let returned = store.insert_usage(second).await.unwrap();
        assert_eq!(returned, first);
    }

    #[tokio::test]
    async fn test_top_up_replaces_only_with_new_runs() {
        let store = InMemoryStore::new();
        let first = UsageLedgerEntry {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            scope_key: "org:acme".into(),
            run_count: 1,
            amount: 0.0015,
            charged_run_ids: [Uuid::new_v4()].into_iter().collect(),
            charged_at: Utc::now(),
        };
        store.insert_usage(first.clone()).await.unwrap();

        let mut topped = first.clone();
        topped.charged_run_ids.insert(Uuid::new_v4());
        topped.run_count = 2;
        topped.amount = 0.003;
        assert_eq!(store.top_up_usage(topped.clone()).await.unwrap(), topped);

        // 没有新执行记录的补记不会覆盖
        let stale = first.clone();
        assert_eq!(store.top_up_usage(stale).await.unwrap(), topped);
        assert_eq!(
            store.find_usage(first.batch_id, "org:acme").await.unwrap(),
            Some(topped)
        );
    }
}
