//! 运行处理器 - 编排层入口
//!
//! ## 职责
//!
//! 处理一个范围的一次运行：
//!
//! 1. **批次**：获取或创建当前周期的批次（续跑检查 1）
//! 2. **计划**：按 (模型, 地区) 组合过滤、分块（续跑检查 2）
//! 3. **调度**：有界并发执行所有工作单元
//! 4. **收尾**：写入批次终态，完成的批次记账
//! 5. **下游**：注入了抽取器时执行下游处理（续跑检查 3）
//! 6. **统计**：输出最终统计
//!
//! 被取消的运行不写终态、不记账，批次保持 running，下次触发时续跑。

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::batch_orchestrator::BatchOrchestrator;
use super::dispatcher::Dispatcher;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{BatchStatus, ModelLocationPair, RunManifest, UsageLedgerEntry};
use crate::providers::ProviderRegistry;
use crate::services::{ResumeService, UsageService};
use crate::store::RunStore;
use crate::utils::logging::{log_manifest_loaded, log_startup, print_final_stats};
use crate::workflow::{ExtractionFlow, ExtractionStats, Extractor};

/// 一次运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub batch_id: Uuid,
    /// 是否复用了本周期已有的批次
    pub resumed: bool,
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// 已完成而跳过的组合数
    pub skipped: usize,
    /// 本次运行新产生的费用
    pub cost: f64,
    /// 组合级和块级错误
    pub errors: Vec<String>,
    pub interrupted: bool,
    pub usage: Option<UsageLedgerEntry>,
    pub extraction: Option<ExtractionStats>,
}

/// 运行处理器
pub struct RunProcessor {
    config: Config,
    store: Arc<dyn RunStore>,
    registry: Arc<ProviderRegistry>,
    extractor: Option<Arc<dyn Extractor>>,
}

impl RunProcessor {
    pub fn new(config: Config, store: Arc<dyn RunStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
            extractor: None,
        }
    }

    /// 注入下游抽取器
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// 执行一次运行
    pub async fn run(
        &self,
        manifest: &RunManifest,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        manifest.validate()?;
        log_startup(self.config.max_concurrent_units, &manifest.scope.key());
        log_manifest_loaded(
            manifest.questions.len(),
            manifest.models.len(),
            manifest.locations.len(),
        );

        let pairs = expand_pairs(manifest);
        let total = manifest.questions.len() * pairs.len();
        let websearch = manifest.websearch.unwrap_or(self.config.websearch);

        // ========== 续跑检查 1：批次 ==========
        let resume = ResumeService::new(self.store.clone(), self.config.cycle_window);
        let (batch, resumed) = resume
            .get_or_create_cycle_batch(&manifest.scope, total, Utc::now())
            .await?;

        // ========== 续跑检查 2：执行记录 ==========
        let orchestrator = Arc::new(BatchOrchestrator::new(
            self.registry.clone(),
            resume.clone(),
            self.store.clone(),
            websearch,
        ));
        let plan = orchestrator
            .plan(batch.id, &pairs, &manifest.questions)
            .await?;
        info!(
            "[批次 {}] 📋 计划: {} 个工作单元，{} 个组合已完成，{} 个组合级错误",
            batch.id,
            plan.items.len(),
            plan.skipped,
            plan.errors.len()
        );

        // ========== 调度 ==========
        let dispatcher = Dispatcher::new(
            orchestrator,
            self.store.clone(),
            self.config.max_concurrent_units,
        );
        let report = dispatcher.dispatch(batch.id, plan.items, cancel).await?;

        let mut errors = plan.errors;
        errors.extend(report.errors.iter().cloned());

        let mut summary = RunSummary {
            batch_id: batch.id,
            resumed,
            status: batch.status,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: plan.skipped + report.skipped,
            cost: report.cost,
            errors,
            interrupted: report.cancelled,
            usage: None,
            extraction: None,
        };

        if summary.interrupted {
            warn!(
                "[批次 {}] 🛑 运行被中断，{} 个问题未执行；批次保持 running",
                batch.id, report.not_started
            );
            self.print_stats(&summary);
            return Ok(summary);
        }

        // ========== 收尾 ==========
        let persisted = self.store.runs_for_batch(batch.id).await?.len();
        let status = if persisted == 0 && summary.failed > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        let batch = self.store.finish_batch(batch.id, status, Utc::now()).await?;
        summary.status = batch.status;

        // 没有任何执行记录的失败批次不记账，续跑成功后再记
        if status == BatchStatus::Completed {
            let usage = UsageService::new(self.store.clone());
            summary.usage = Some(usage.charge_batch(&batch).await?);
        }

        // ========== 续跑检查 3：下游处理 ==========
        if let Some(extractor) = &self.extractor {
            let flow = ExtractionFlow::new(
                self.store.clone(),
                resume,
                extractor.clone(),
                self.config.max_concurrent_units,
            );
            summary.extraction = Some(flow.run(batch.id, cancel).await?);
        }

        self.print_stats(&summary);
        Ok(summary)
    }

    fn print_stats(&self, summary: &RunSummary) {
        print_final_stats(
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.cost,
            &summary.errors,
        );
    }
}

/// 展开 模型 × 地区 组合，地区已规范化并去重
fn expand_pairs(manifest: &RunManifest) -> Vec<ModelLocationPair> {
    let mut pairs: Vec<ModelLocationPair> = Vec::new();
    for model in &manifest.models {
        for location in &manifest.locations {
            let pair = ModelLocationPair::new(model.trim(), location.clone());
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }
    pairs
}
