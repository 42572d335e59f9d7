//! 批次编排器
//!
//! ## 职责
//!
//! 1. **分组**：按 (模型, 地区) 组合处理，一次提供方调用只携带一个组合
//! 2. **过滤**：跳过批次内已有执行记录的问题
//! 3. **分块**：支持批量的提供方按 `max_batch_size` 切块，保持原顺序；
//!    不支持批量的提供方每个问题一块
//! 4. **执行**：异步提供方走 submit → poll → retrieve，同步提供方直接调用
//! 5. **落库**：每个问题写一条执行记录，包括提供方报告失败的条目
//!
//! 块级失败只影响本块；组合级失败（如未知模型）记录后继续处理其他组合。

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppResult, ProviderError};
use crate::models::{ModelLocationPair, Question, QuestionRun};
use crate::providers::job::run_job;
use crate::providers::{AiProvider, ProviderRegistry, ProviderResponse};
use crate::services::ResumeService;
use crate::store::RunStore;
use crate::utils::logging::log_pair_start;
use crate::workflow::UnitCtx;

/// 按上限切块，保持原顺序；`max` 为 0 或 1 时每个问题一块
pub fn chunk_questions(questions: &[Question], max: usize) -> Vec<Vec<Question>> {
    let size = max.max(1);
    questions.chunks(size).map(|c| c.to_vec()).collect()
}

/// 一个可调度的工作单元：一个组合的一块问题
#[derive(Clone)]
pub struct WorkItem {
    pub pair: ModelLocationPair,
    pub questions: Vec<Question>,
    pub provider: Arc<dyn AiProvider>,
    pub chunk_index: usize,
    pub chunk_count: usize,
}

impl WorkItem {
    pub fn ctx(&self, batch_id: Uuid) -> UnitCtx {
        UnitCtx::new(
            batch_id,
            self.pair.to_string(),
            self.chunk_index,
            self.chunk_count,
        )
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("pair", &self.pair)
            .field("questions", &self.questions.len())
            .field("provider", &self.provider.name())
            .field("chunk", &(self.chunk_index, self.chunk_count))
            .finish()
    }
}

/// 单个组合的计划
#[derive(Debug, Default)]
pub struct PairPlan {
    pub items: Vec<WorkItem>,
    /// 已有执行记录而跳过的问题数
    pub skipped: usize,
}

/// 整个运行的计划
#[derive(Debug, Default)]
pub struct Plan {
    pub items: Vec<WorkItem>,
    pub skipped: usize,
    /// 组合级错误
    pub errors: Vec<String>,
}

/// 单个工作单元的执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOutcome {
    /// 已落库且可用的执行记录数
    pub succeeded: usize,
    /// 已落库但提供方报告失败的执行记录数
    pub failed_runs: usize,
    /// 整块失败、未落库的问题数（下次运行会重试）
    pub unit_failures: usize,
    /// 写入时发现已存在的问题数
    pub skipped: usize,
    pub cost: f64,
    /// 块级错误
    pub error: Option<String>,
}

impl ItemOutcome {
    fn chunk_failed(size: usize, message: String) -> Self {
        Self {
            unit_failures: size,
            error: Some(message),
            ..Default::default()
        }
    }
}

/// 批次编排器
pub struct BatchOrchestrator {
    registry: Arc<ProviderRegistry>,
    resume: ResumeService,
    store: Arc<dyn RunStore>,
    websearch: bool,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resume: ResumeService,
        store: Arc<dyn RunStore>,
        websearch: bool,
    ) -> Self {
        Self {
            registry,
            resume,
            store,
            websearch,
        }
    }

    /// 为单个组合生成工作单元
    pub async fn plan_pair(
        &self,
        batch_id: Uuid,
        pair: &ModelLocationPair,
        questions: &[Question],
    ) -> AppResult<PairPlan> {
        let provider = self.registry.resolve(&pair.model)?;
        let split = self.resume.filter_pending(batch_id, pair, questions).await?;

        let max = if provider.supports_batching() {
            provider.max_batch_size()
        } else {
            1
        };
        let chunks = chunk_questions(&split.pending, max);
        let chunk_count = chunks.len();

        log_pair_start(
            &pair.to_string(),
            split.pending.len(),
            split.skipped(),
            chunk_count,
        );

        let items = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| WorkItem {
                pair: pair.clone(),
                questions: chunk,
                provider: provider.clone(),
                chunk_index: i + 1,
                chunk_count,
            })
            .collect();

        Ok(PairPlan {
            items,
            skipped: split.skipped(),
        })
    }

    /// 为所有组合生成计划
    ///
    /// 组合级错误记录后继续；存储或配置错误直接返回
    pub async fn plan(
        &self,
        batch_id: Uuid,
        pairs: &[ModelLocationPair],
        questions: &[Question],
    ) -> AppResult<Plan> {
        let mut plan = Plan::default();

        for pair in pairs {
            match self.plan_pair(batch_id, pair, questions).await {
                Ok(pair_plan) => {
                    plan.skipped += pair_plan.skipped;
                    plan.items.extend(pair_plan.items);
                }
                Err(e) if e.is_resource_level() => return Err(e),
                Err(e) => {
                    error!("[组合 {}] ❌ 无法生成计划: {}", pair, e);
                    plan.errors.push(format!("{}: {}", pair, e));
                }
            }
        }

        Ok(plan)
    }

    /// 执行一个工作单元并写入执行记录
    ///
    /// 提供方错误被收敛为块级失败；只有存储错误和取消会返回 `Err`
    pub async fn execute_item(
        &self,
        batch_id: Uuid,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> AppResult<ItemOutcome> {
        let ctx = item.ctx(batch_id);
        let size = item.questions.len();
        info!("{} 🚀 开始执行 {} 个问题", ctx, size);

        let responses = match self.call_provider(item, cancel).await {
            Ok(responses) => responses,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("{} ❌ 块执行失败: {}", ctx, e);
                return Ok(ItemOutcome::chunk_failed(
                    size,
                    format!("{} 块 {}/{}: {}", item.pair, item.chunk_index, item.chunk_count, e),
                ));
            }
        };

        if responses.len() != size {
            let e = ProviderError::ResponseCountMismatch {
                provider: item.provider.name().to_string(),
                expected: size,
                actual: responses.len(),
            };
            warn!("{} ❌ {}", ctx, e);
            return Ok(ItemOutcome::chunk_failed(
                size,
                format!("{} 块 {}/{}: {}", item.pair, item.chunk_index, item.chunk_count, e),
            ));
        }

        let mut outcome = ItemOutcome::default();
        for (question, response) in item.questions.iter().zip(responses) {
            let run = self.build_run(batch_id, &item.pair, question, response);
            let usable = run.usable;
            let cost = run.cost;

            match self.store.insert_run(run).await {
                Ok(()) => {
                    outcome.cost += cost;
                    if usable {
                        outcome.succeeded += 1;
                    } else {
                        outcome.failed_runs += 1;
                    }
                }
                Err(e) if e.is_duplicate_run() => {
                    warn!("{} ⏭️ 问题 {} 已有执行记录，跳过写入", ctx, question.id);
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "{} ✓ 完成: 可用 {} / 失败 {} / 跳过 {} (${:.4})",
            ctx, outcome.succeeded, outcome.failed_runs, outcome.skipped, outcome.cost
        );
        Ok(outcome)
    }

    async fn call_provider(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<ProviderResponse>> {
        let provider = item.provider.as_ref();
        let location = &item.pair.location;

        if provider.is_async() {
            return run_job(provider, &item.questions, self.websearch, location, cancel).await;
        }

        match item.questions.as_slice() {
            [question] => Ok(vec![
                provider
                    .execute_one(question, self.websearch, location, cancel)
                    .await?,
            ]),
            questions => {
                provider
                    .execute_batch(questions, self.websearch, location, cancel)
                    .await
            }
        }
    }

    fn build_run(
        &self,
        batch_id: Uuid,
        pair: &ModelLocationPair,
        question: &Question,
        response: ProviderResponse,
    ) -> QuestionRun {
        QuestionRun {
            id: Uuid::new_v4(),
            batch_id,
            question_id: question.id.clone(),
            model: pair.model.clone(),
            location: pair.location.clone(),
            response_text: response.text,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost: response.cost,
            citations: response.citations,
            websearch: self.websearch,
            usable: response.usable,
            error: response.error,
            created_at: Utc::now(),
        }
    }
}
