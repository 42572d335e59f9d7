//! 并发调度器
//!
//! 固定数量的 worker 从共享队列中取工作单元，交给编排器执行，
//! 结果通过 channel 汇总到唯一的聚合点。批次计数只在聚合点更新。
//!
//! 存储错误会取消所有 worker 并返回；外部取消时停止领取新单元，
//! 已被提供方接受的任务不会撤回。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch_orchestrator::{BatchOrchestrator, ItemOutcome, WorkItem};
use crate::error::{AppError, AppResult};
use crate::models::ProgressDelta;
use crate::store::RunStore;

/// 一次调度的汇总
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub succeeded: usize,
    /// 提供方报告失败的条目 + 整块失败的问题
    pub failed: usize,
    pub skipped: usize,
    pub cost: f64,
    pub errors: Vec<String>,
    /// 因取消而未执行的问题数
    pub not_started: usize,
    pub cancelled: bool,
}

impl DispatchReport {
    fn absorb(&mut self, outcome: ItemOutcome) {
        self.succeeded += outcome.succeeded;
        self.failed += outcome.failed_runs + outcome.unit_failures;
        self.skipped += outcome.skipped;
        self.cost += outcome.cost;
        if let Some(e) = outcome.error {
            self.errors.push(e);
        }
    }
}

struct UnitResult {
    size: usize,
    result: AppResult<ItemOutcome>,
}

/// 并发调度器
pub struct Dispatcher {
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<dyn RunStore>,
    max_workers: usize,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        store: Arc<dyn RunStore>,
        max_workers: usize,
    ) -> Self {
        Self {
            orchestrator,
            store,
            max_workers: max_workers.max(1),
        }
    }

    /// 并发执行所有工作单元
    ///
    /// # 返回
    /// 返回汇总结果；存储错误时返回 `Err`
    pub async fn dispatch(
        &self,
        batch_id: Uuid,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> AppResult<DispatchReport> {
        let total_items = items.len();
        if total_items == 0 {
            return Ok(DispatchReport::default());
        }

        let workers = self.max_workers.min(total_items);
        info!(
            "[批次 {}] 🧵 启动 {} 个 worker 处理 {} 个工作单元",
            batch_id, workers, total_items
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let child = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<UnitResult>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 1..=workers {
            let queue = queue.clone();
            let orchestrator = self.orchestrator.clone();
            let token = child.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(_) => None,
                    };
                    let Some(item) = next else {
                        break;
                    };

                    let size = item.questions.len();
                    let result = orchestrator.execute_item(batch_id, &item, &token).await;
                    if tx.send(UnitResult { size, result }).await.is_err() {
                        break;
                    }
                }
                debug!("worker {} 退出", worker_id);
            }));
        }
        drop(tx);

        // ========== 唯一聚合点 ==========
        let mut report = DispatchReport::default();
        let mut fatal: Option<AppError> = None;

        while let Some(unit) = rx.recv().await {
            match unit.result {
                Ok(outcome) => {
                    let delta = ProgressDelta {
                        completed: outcome.succeeded,
                        failed: outcome.failed_runs,
                    };
                    report.absorb(outcome);
                    if delta != ProgressDelta::default() && fatal.is_none() {
                        if let Err(e) = self.store.record_progress(batch_id, delta).await {
                            error!("[批次 {}] ❌ 更新批次进度失败: {}", batch_id, e);
                            fatal = Some(e);
                            child.cancel();
                        }
                    }
                }
                Err(e) if e.is_cancelled() => {
                    report.not_started += unit.size;
                }
                Err(e) => {
                    error!("[批次 {}] ❌ 资源级错误，停止调度: {}", batch_id, e);
                    report.failed += unit.size;
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                    child.cancel();
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("[批次 {}] worker 异常退出: {}", batch_id, e);
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let leftover: usize = match queue.lock() {
            Ok(q) => q.iter().map(|i| i.questions.len()).sum(),
            Err(_) => 0,
        };
        report.not_started += leftover;
        report.cancelled = cancel.is_cancelled();

        if report.cancelled {
            warn!(
                "[批次 {}] 🛑 调度被取消，{} 个问题未执行，下次运行会继续",
                batch_id, report.not_started
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, CycleWindow};
    use crate::models::{Batch, BatchScope, Location, ModelLocationPair, Question};
    use crate::providers::{AiProvider, ProviderRegistry, ProviderResponse};
    use crate::services::ResumeService;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录同时在途调用数的假提供方
    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl AiProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }
        fn is_async(&self) -> bool {
            false
        }
        fn supports_batching(&self) -> bool {
            false
        }
        fn max_batch_size(&self) -> usize {
            1
        }
        async fn execute_one(
            &self,
            question: &Question,
            _websearch: bool,
            _location: &Location,
            cancel: &CancellationToken,
        ) -> AppResult<ProviderResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let slept = crate::clients::job_client::sleep_or_cancel(cancel, self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            slept?;
            Ok(ProviderResponse {
                text: question.text.clone(),
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.5,
                citations: vec![],
                usable: true,
                error: None,
            })
        }
    }

    async fn setup(
        delay: Duration,
        workers: usize,
    ) -> (Arc<InMemoryStore>, Arc<SlowProvider>, Dispatcher, Vec<WorkItem>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SlowProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        });
        let registry = ProviderRegistry::new(&Config::default()).unwrap();
        registry.register("slow", provider.clone());
        let orchestrator = Arc::new(BatchOrchestrator::new(
            Arc::new(registry),
            ResumeService::new(store.clone(), CycleWindow::Daily),
            store.clone(),
            false,
        ));

        let batch = Batch::new(BatchScope::Org("acme".into()), 8, Utc::now());
        let batch_id = batch.id;
        store.insert_batch(batch).await.unwrap();

        let questions: Vec<Question> = (1..=8)
            .map(|i| Question::new(format!("q{}", i), format!("text {}", i)))
            .collect();
        let pair = ModelLocationPair::new("slow", Location::country("US"));
        let plan = orchestrator
            .plan_pair(batch_id, &pair, &questions)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(orchestrator, store.clone(), workers);
        (store, provider, dispatcher, plan.items, batch_id)
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (store, provider, dispatcher, items, batch_id) =
            setup(Duration::from_millis(20), 3).await;

        let report = dispatcher
            .dispatch(batch_id, items, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 8);
        assert_eq!(report.failed, 0);
        assert!((report.cost - 4.0).abs() < 1e-9);
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);
        assert!(!report.cancelled);

        // 计数只通过聚合点更新
        let batch = store.get_batch(batch_id).await.unwrap();
        assert_eq!(batch.completed_questions, 8);
        assert_eq!(batch.failed_questions, 0);
    }

    #[tokio::test]
    async fn test_cancel_leaves_no_partial_runs() {
        let (store, _provider, dispatcher, items, batch_id) =
            setup(Duration::from_secs(60), 2).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = tokio_test::assert_ok!(dispatcher.dispatch(batch_id, items, &cancel).await);
        assert!(report.cancelled);
        assert_eq!(report.not_started, 8);
        assert!(store.runs_for_batch(batch_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_dispatch() {
        let (_store, _provider, dispatcher, _items, batch_id) =
            setup(Duration::from_millis(1), 2).await;
        let report = dispatcher
            .dispatch(batch_id, vec![], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, DispatchReport::default());
    }
}
