//! 持久化层
//!
//! 引擎只通过 `RunStore` 读写批次、执行记录、下游产物和计费记录。
//! 所有检查都是"先读后写"的守卫，依赖执行记录按组合唯一、只追加不覆盖。

pub mod in_memory;
pub mod jsonl;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    ArtifactKind, Batch, BatchScope, BatchStatus, ProgressDelta, QuestionRun, RunKey,
    UsageLedgerEntry,
};

pub use in_memory::InMemoryStore;
pub use jsonl::JsonlStore;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// 查找范围内 `since` 之后创建的最新批次（不论状态）
    async fn find_batch_since(
        &self,
        scope: &BatchScope,
        since: DateTime<Utc>,
    ) -> AppResult<Option<Batch>>;

    /// 写入新批次，同时清除该范围旧批次的 is_latest 标记
    async fn insert_batch(&self, batch: Batch) -> AppResult<()>;

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Batch>;

    /// pending → running，记录开始时间
    async fn mark_batch_running(&self, batch_id: Uuid, now: DateTime<Utc>) -> AppResult<Batch>;

    /// 写入终态
    async fn finish_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Batch>;

    /// 批次计数的唯一修改入口
    async fn record_progress(&self, batch_id: Uuid, delta: ProgressDelta) -> AppResult<Batch>;

    async fn find_run(&self, key: &RunKey) -> AppResult<Option<QuestionRun>>;

    /// 写入执行记录；同一组合已存在时返回 `StoreError::DuplicateRun`
    async fn insert_run(&self, run: QuestionRun) -> AppResult<()>;

    async fn runs_for_batch(&self, batch_id: Uuid) -> AppResult<Vec<QuestionRun>>;

    async fn artifacts_for_run(&self, run_id: Uuid) -> AppResult<BTreeSet<ArtifactKind>>;

    async fn put_artifact(&self, run_id: Uuid, kind: ArtifactKind) -> AppResult<()>;

    /// 清除一条执行记录的全部下游产物（用于整体重做）
    async fn clear_artifacts(&self, run_id: Uuid) -> AppResult<()>;

    async fn find_usage(
        &self,
        batch_id: Uuid,
        scope_key: &str,
    ) -> AppResult<Option<UsageLedgerEntry>>;

    /// 写入计费记录；已存在时原样返回已有记录
    async fn insert_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry>;

    /// 用补记后的记录替换已有记录；已有记录已覆盖这些执行记录时原样返回
    async fn top_up_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry>;
}
