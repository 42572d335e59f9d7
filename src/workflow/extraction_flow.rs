//! 下游处理流程 - 流程层
//!
//! 遍历批次内的执行记录，按第三个续跑检查决定每条记录的处理方式：
//! - 不可用的回答：不做抽取
//! - 产物齐全：跳过
//! - 只有部分产物：清空后整体重做
//! - 没有产物：首次处理
//!
//! 具体的抽取逻辑由调用方注入的 `Extractor` 实现。

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ArtifactKind, QuestionRun};
use crate::services::{DownstreamAction, ResumeService};
use crate::store::RunStore;

/// 下游抽取能力
#[async_trait]
pub trait Extractor: Send + Sync {
    /// 为一条执行记录生成一种产物
    async fn extract(
        &self,
        run: &QuestionRun,
        kind: ArtifactKind,
        cancel: &CancellationToken,
    ) -> AppResult<()>;
}

/// 单条记录的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionResult {
    Processed,
    Reprocessed,
    Skipped,
    Unusable,
    Failed,
}

/// 下游处理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionStats {
    pub processed: usize,
    pub reprocessed: usize,
    pub skipped: usize,
    pub unusable: usize,
    pub failed: usize,
}

impl ExtractionStats {
    fn add(&mut self, result: ExtractionResult) {
        match result {
            ExtractionResult::Processed => self.processed += 1,
            ExtractionResult::Reprocessed => self.reprocessed += 1,
            ExtractionResult::Skipped => self.skipped += 1,
            ExtractionResult::Unusable => self.unusable += 1,
            ExtractionResult::Failed => self.failed += 1,
        }
    }
}

/// 下游处理流程
pub struct ExtractionFlow {
    store: Arc<dyn RunStore>,
    resume: ResumeService,
    extractor: Arc<dyn Extractor>,
    concurrency: usize,
}

impl ExtractionFlow {
    pub fn new(
        store: Arc<dyn RunStore>,
        resume: ResumeService,
        extractor: Arc<dyn Extractor>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            resume,
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    /// 处理批次内的所有执行记录
    pub async fn run(&self, batch_id: Uuid, cancel: &CancellationToken) -> AppResult<ExtractionStats> {
        let runs = self.store.runs_for_batch(batch_id).await?;
        info!("[批次 {}] 🔎 下游处理 {} 条执行记录", batch_id, runs.len());

        let results: Vec<AppResult<ExtractionResult>> = stream::iter(runs)
            .map(|run| async move { self.process_run(&run, cancel).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = ExtractionStats::default();
        for result in results {
            stats.add(result?);
        }

        info!(
            "[批次 {}] ✓ 下游处理完成: 新处理 {} / 重做 {} / 跳过 {} / 不可用 {} / 失败 {}",
            batch_id,
            stats.processed,
            stats.reprocessed,
            stats.skipped,
            stats.unusable,
            stats.failed
        );
        Ok(stats)
    }

    async fn process_run(
        &self,
        run: &QuestionRun,
        cancel: &CancellationToken,
    ) -> AppResult<ExtractionResult> {
        if !run.usable {
            return Ok(ExtractionResult::Unusable);
        }

        let action = self.resume.classify_downstream(run.id).await?;
        let result = match action {
            DownstreamAction::Skip => return Ok(ExtractionResult::Skipped),
            DownstreamAction::Reprocess => {
                warn!(
                    "[记录 {}] ♻️ 下游产物不完整，整体重做",
                    run.key()
                );
                self.store.clear_artifacts(run.id).await?;
                ExtractionResult::Reprocessed
            }
            DownstreamAction::Process => ExtractionResult::Processed,
        };

        for kind in ArtifactKind::ALL {
            match self.extractor.extract(run, kind, cancel).await {
                Ok(()) => self.store.put_artifact(run.id, kind).await?,
                Err(e) if e.is_resource_level() || e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("[记录 {}] ⚠️ 抽取 {:?} 失败: {}", run.key(), kind, e);
                    return Ok(ExtractionResult::Failed);
                }
            }
        }

        Ok(result)
    }
}
