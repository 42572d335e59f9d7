//! 断点续跑服务
//!
//! 三个相互独立的检查，都在付费操作之前执行：
//! 1. 批次：同一范围在周期窗口内只创建一个批次
//! 2. 执行记录：已存在的 (问题, 模型, 地区) 组合不再执行
//! 3. 下游处理：按已有产物决定跳过、重做或首次处理
//!
//! 这些检查都是"先读后写"，不是事务。执行记录只追加，重复检查是安全的。

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CycleWindow;
use crate::error::AppResult;
use crate::models::{
    ArtifactKind, Batch, BatchScope, BatchStatus, ModelLocationPair, Question, QuestionRun, RunKey,
};
use crate::store::RunStore;

/// 下游处理决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownstreamAction {
    /// 所有产物都已存在
    Skip,
    /// 只有部分产物，整体重做
    Reprocess,
    /// 没有任何产物
    Process,
}

/// 一个组合的过滤结果
#[derive(Debug, Clone, Default)]
pub struct PendingSplit {
    /// 需要执行的问题，保持原顺序
    pub pending: Vec<Question>,
    /// 已存在的执行记录，供下游复用
    pub existing: Vec<QuestionRun>,
}

impl PendingSplit {
    pub fn skipped(&self) -> usize {
        self.existing.len()
    }
}

/// 周期窗口的起点（UTC）
pub fn cycle_start(window: CycleWindow, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let start = match window {
        CycleWindow::Daily => today,
        CycleWindow::Weekly => {
            today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
        }
    };
    start.and_time(NaiveTime::MIN).and_utc()
}

/// 断点续跑服务
#[derive(Clone)]
pub struct ResumeService {
    store: Arc<dyn RunStore>,
    window: CycleWindow,
}

impl ResumeService {
    pub fn new(store: Arc<dyn RunStore>, window: CycleWindow) -> Self {
        Self { store, window }
    }

    /// 获取或创建当前周期的批次
    ///
    /// # 返回
    /// 返回 (批次, 是否为续跑)
    pub async fn get_or_create_cycle_batch(
        &self,
        scope: &BatchScope,
        total_questions: usize,
        now: DateTime<Utc>,
    ) -> AppResult<(Batch, bool)> {
        let since = cycle_start(self.window, now);

        if let Some(batch) = self.store.find_batch_since(scope, since).await? {
            info!(
                "[批次 {}] 🔁 续跑：复用 {} 创建的批次 (状态 {:?}, 已完成 {}/{})",
                batch.id,
                batch.created_at.format("%Y-%m-%d %H:%M:%S"),
                batch.status,
                batch.completed_questions,
                batch.total_questions
            );
            // 只有仍是 pending 的批次才需要"开始"记账
            let batch = if batch.status == BatchStatus::Pending {
                self.store.mark_batch_running(batch.id, now).await?
            } else {
                batch
            };
            return Ok((batch, true));
        }

        let batch = Batch::new(scope.clone(), total_questions, now);
        let batch_id = batch.id;
        self.store.insert_batch(batch).await?;
        let batch = self.store.mark_batch_running(batch_id, now).await?;
        info!(
            "[批次 {}] 🆕 为 {} 创建新批次，共 {} 个组合",
            batch_id, scope, total_questions
        );
        Ok((batch, false))
    }

    /// 过滤掉批次内已有执行记录的问题
    pub async fn filter_pending(
        &self,
        batch_id: Uuid,
        pair: &ModelLocationPair,
        questions: &[Question],
    ) -> AppResult<PendingSplit> {
        let mut split = PendingSplit::default();

        for question in questions {
            let key = RunKey {
                batch_id,
                question_id: question.id.clone(),
                model: pair.model.clone(),
                location: pair.location.clone(),
            };
            match self.store.find_run(&key).await? {
                Some(run) => split.existing.push(run),
                None => split.pending.push(question.clone()),
            }
        }

        debug!(
            "[组合 {}] 待执行 {} 个，已存在 {} 个",
            pair,
            split.pending.len(),
            split.skipped()
        );
        Ok(split)
    }

    /// 判断一条执行记录的下游处理方式
    pub async fn classify_downstream(&self, run_id: Uuid) -> AppResult<DownstreamAction> {
        let present = self.store.artifacts_for_run(run_id).await?;
        let action = if present.is_empty() {
            DownstreamAction::Process
        } else if ArtifactKind::ALL.iter().all(|k| present.contains(k)) {
            DownstreamAction::Skip
        } else {
            DownstreamAction::Reprocess
        };
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn service(window: CycleWindow) -> (Arc<InMemoryStore>, ResumeService) {
        let store = Arc::new(InMemoryStore::new());
        let resume = ResumeService::new(store.clone(), window);
        (store, resume)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn run(batch_id: Uuid, question_id: &str, pair: &ModelLocationPair) -> QuestionRun {
        QuestionRun {
            id: Uuid::new_v4(),
            batch_id,
            question_id: question_id.to_string(),
            model: pair.model.clone(),
            location: pair.location.clone(),
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

    #[test]
    fn test_cycle_start() {
        // 2026-10-21 是星期三
        let now = at(2026, 10, 21, 15);
        assert_eq!(cycle_start(CycleWindow::Daily, now), at(2026, 10, 21, 0));
        assert_eq!(cycle_start(CycleWindow::Weekly, now), at(2026, 10, 19, 0));
    }

    #[tokio::test]
    async fn test_batch_reused_within_day() {
        let (store, resume) = service(CycleWindow::Daily);
        let scope = BatchScope::Org("acme".into());

        let (first, resumed) = resume
            .get_or_create_cycle_batch(&scope, 6, at(2026, 10, 21, 8))
            .await
            .unwrap();
        assert!(!resumed);
        assert_eq!(first.status, BatchStatus::Running);
        assert!(first.started_at.is_some());

        let (second, resumed) = resume
            .get_or_create_cycle_batch(&scope, 6, at(2026, 10, 21, 20))
            .await
            .unwrap();
        assert!(resumed);
        assert_eq!(second.id, first.id);
        // 已在运行的批次不重复记录开始时间
        assert_eq!(second.started_at, first.started_at);

        let (next_day, resumed) = resume
            .get_or_create_cycle_batch(&scope, 6, at(2026, 10, 22, 1))
            .await
            .unwrap();
        assert!(!resumed);
        assert_ne!(next_day.id, first.id);
        assert_eq!(store.batches(&scope).await.len(), 2);
    }

    #[tokio::test]
    async fn test_completed_batch_is_still_reused() {
        let (store, resume) = service(CycleWindow::Weekly);
        let scope = BatchScope::Network("global".into());
        let (batch, _) = resume
            .get_or_create_cycle_batch(&scope, 1, at(2026, 10, 19, 9))
            .await
            .unwrap();
        store
            .finish_batch(batch.id, BatchStatus::Completed, at(2026, 10, 19, 10))
            .await
            .unwrap();

        let (again, resumed) = resume
            .get_or_create_cycle_batch(&scope, 1, at(2026, 10, 24, 9))
            .await
            .unwrap();
        assert!(resumed);
        assert_eq!(again.id, batch.id);
        assert_eq!(again.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_filter_pending_keeps_order() {
        let (store, resume) = service(CycleWindow::Daily);
        let batch_id = Uuid::new_v4();
        let pair = ModelLocationPair::new("chatgpt", Location::country("us"));
        store.insert_run(run(batch_id, "q2", &pair)).await.unwrap();

        let questions = vec![
            Question::new("q1", "a"),
            Question::new("q2", "b"),
            Question::new("q3", "c"),
        ];
        let split = resume
            .filter_pending(batch_id, &pair, &questions)
            .await
            .unwrap();
        let ids: Vec<&str> = split.pending.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q3"]);
        assert_eq!(split.skipped(), 1);

        // 其他地区不受影响
        let other = ModelLocationPair::new("chatgpt", Location::country("gb"));
        let split = resume
            .filter_pending(batch_id, &other, &questions)
            .await
            .unwrap();
        assert_eq!(split.pending.len(), 3);
    }

    #[tokio::test]
    async fn test_classify_downstream() {
        let (store, resume) = service(CycleWindow::Daily);
        let run_id = Uuid::new_v4();
        assert_eq!(
            resume.classify_downstream(run_id).await.unwrap(),
            DownstreamAction::Process
        );

        store
            .put_artifact(run_id, ArtifactKind::Evaluation)
            .await
            .unwrap();
        assert_eq!(
            resume.classify_downstream(run_id).await.unwrap(),
            DownstreamAction::Reprocess
        );

        store
            .put_artifact(run_id, ArtifactKind::Citations)
            .await
            .unwrap();
        store
            .put_artifact(run_id, ArtifactKind::Competitors)
            .await
            .unwrap();
        assert_eq!(
            resume.classify_downstream(run_id).await.unwrap(),
            DownstreamAction::Skip
        );
    }
}
