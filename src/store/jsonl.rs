//! 基于 JSONL 文件的存储
//!
//! 每次修改追加一行事件到 `events.jsonl`，启动时重放，
//! 使进程重启后恢复逻辑仍能看到之前的执行记录。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::in_memory::{InMemoryStore, StoreEvent};
use super::RunStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ArtifactKind, Batch, BatchScope, BatchStatus, ProgressDelta, QuestionRun, RunKey,
    UsageLedgerEntry,
};

const EVENTS_FILE: &str = "events.jsonl";

/// 文件存储
pub struct JsonlStore {
    inner: InMemoryStore,
    /// 写锁同时保证"内存修改 + 追加事件"的顺序与文件一致
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonlStore {
    /// 打开（或创建）存储目录并重放已有事件
    pub async fn open(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::store_io(dir.display().to_string(), e))?;
        let path = dir.join(EVENTS_FILE);
        let path_str = path.display().to_string();

        let inner = InMemoryStore::new();
        let mut needs_newline = false;
        if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::store_io(&path_str, e))?;
            needs_newline = !content.is_empty() && !content.ends_with('\n');
            let mut events = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StoreEvent>(line) {
                    Ok(event) => events.push(event),
                    // 进程中断可能留下半行
                    Err(e) => warn!("⚠️ 跳过无法解析的事件 {}:{}: {}", path_str, line_no + 1, e),
                }
            }
            info!("📂 从 {} 重放 {} 条事件", path_str, events.len());
            inner.replay(events).await;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::store_io(&path_str, e))?;

        if needs_newline {
            file.write_all(b"\n")
                .await
                .map_err(|e| AppError::store_io(&path_str, e))?;
        }

        Ok(Self {
            inner,
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, file: &mut File, event: &StoreEvent) -> AppResult<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::store_io(self.path.display().to_string(), e))?;
        file.flush()
            .await
            .map_err(|e| AppError::store_io(self.path.display().to_string(), e))
    }

    async fn persist_batch(&self, file: &mut File, batch: &Batch) -> AppResult<()> {
        self.append(
            file,
            &StoreEvent::BatchUpdated {
                batch: batch.clone(),
            },
        )
        .await
    }
}

#[async_trait]
impl RunStore for JsonlStore {
    async fn find_batch_since(
        &self,
        scope: &BatchScope,
        since: DateTime<Utc>,
    ) -> AppResult<Option<Batch>> {
        self.inner.find_batch_since(scope, since).await
    }

    async fn insert_batch(&self, batch: Batch) -> AppResult<()> {
        let mut file = self.file.lock().await;
        self.inner.insert_batch(batch.clone()).await?;
        self.append(&mut file, &StoreEvent::BatchCreated { batch })
            .await
    }

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Batch> {
        self.inner.get_batch(batch_id).await
    }

    async fn mark_batch_running(&self, batch_id: Uuid, now: DateTime<Utc>) -> AppResult<Batch> {
        let mut file = self.file.lock().await;
        let batch = self.inner.mark_batch_running(batch_id, now).await?;
        self.persist_batch(&mut file, &batch).await?;
        Ok(batch)
    }

    async fn finish_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Batch> {
        let mut file = self.file.lock().await;
        let batch = self.inner.finish_batch(batch_id, status, now).await?;
        self.persist_batch(&mut file, &batch).await?;
        Ok(batch)
    }

    async fn record_progress(&self, batch_id: Uuid, delta: ProgressDelta) -> AppResult<Batch> {
        let mut file = self.file.lock().await;
        let batch = self.inner.record_progress(batch_id, delta).await?;
        self.persist_batch(&mut file, &batch).await?;
        Ok(batch)
    }

    async fn find_run(&self, key: &RunKey) -> AppResult<Option<QuestionRun>> {
        self.inner.find_run(key).await
    }

    async fn insert_run(&self, run: QuestionRun) -> AppResult<()> {
        let mut file = self.file.lock().await;
        self.inner.insert_run(run.clone()).await?;
        self.append(&mut file, &StoreEvent::RunInserted { run }).await
    }

    async fn runs_for_batch(&self, batch_id: Uuid) -> AppResult<Vec<QuestionRun>> {
        self.inner.runs_for_batch(batch_id).await
    }

    async fn artifacts_for_run(&self, run_id: Uuid) -> AppResult<BTreeSet<ArtifactKind>> {
        self.inner.artifacts_for_run(run_id).await
    }

    async fn put_artifact(&self, run_id: Uuid, kind: ArtifactKind) -> AppResult<()> {
        let mut file = self.file.lock().await;
        self.inner.put_artifact(run_id, kind).await?;
        self.append(&mut file, &StoreEvent::ArtifactPut { run_id, kind })
            .await
    }

    async fn clear_artifacts(&self, run_id: Uuid) -> AppResult<()> {
        let mut file = self.file.lock().await;
        self.inner.clear_artifacts(run_id).await?;
        self.append(&mut file, &StoreEvent::ArtifactsCleared { run_id })
            .await
    }

    async fn find_usage(
        &self,
        batch_id: Uuid,
        scope_key: &str,
    ) -> AppResult<Option<UsageLedgerEntry>> {
        self.inner.find_usage(batch_id, scope_key).await
    }

    async fn insert_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry> {
        let mut file = self.file.lock().await;
        let stored = self.inner.insert_usage(entry.clone()).await?;
        if stored.id == entry.id {
            self.append(&mut file, &StoreEvent::UsageInserted { entry })
                .await?;
        }
        Ok(stored)
    }

    async fn top_up_usage(&self, entry: UsageLedgerEntry) -> AppResult<UsageLedgerEntry> {
        let mut file = self.file.lock().await;
        let stored = self.inner.top_up_usage(entry.clone()).await?;
        if stored == entry {
            self.append(&mut file, &StoreEvent::UsageToppedUp { entry })
                .await?;
        }
        Ok(stored)
    }
}
