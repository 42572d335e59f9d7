//! 计费服务
//!
//! 每个 (批次, 范围) 只有一条计费记录。续跑新增的执行记录补记到这条记录上，
//! 已计费的执行记录不会重复计费。

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Batch, QuestionRun, UsageLedgerEntry};
use crate::store::RunStore;

pub struct UsageService {
    store: Arc<dyn RunStore>,
}

impl UsageService {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// 为批次记账
    ///
    /// 首次记账写入全部执行记录；之后只补记尚未计费的执行记录，没有新记录时原样返回
    pub async fn charge_batch(&self, batch: &Batch) -> AppResult<UsageLedgerEntry> {
        let scope_key = batch.scope.key();
        let runs = self.store.runs_for_batch(batch.id).await?;

        let Some(existing) = self.store.find_usage(batch.id, &scope_key).await? else {
            let entry = UsageLedgerEntry {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                scope_key,
                run_count: runs.len(),
                amount: total_cost(runs.iter()),
                charged_run_ids: runs.iter().map(|r| r.id).collect(),
                charged_at: Utc::now(),
            };
            let entry = self.store.insert_usage(entry).await?;
            info!(
                "[批次 {}] 💳 记账 {} 条执行记录，共 ${:.4}",
                batch.id, entry.run_count, entry.amount
            );
            return Ok(entry);
        };

        let uncharged: Vec<&QuestionRun> = runs
            .iter()
            .filter(|r| !existing.charged_run_ids.contains(&r.id))
            .collect();
        if uncharged.is_empty() {
            info!(
                "[批次 {}] 💳 已记账 ${:.4}，没有新的执行记录",
                batch.id, existing.amount
            );
            return Ok(existing);
        }

        let extra = total_cost(uncharged.iter().copied());
        let mut entry = existing;
        entry.run_count += uncharged.len();
        entry.amount += extra;
        entry.charged_run_ids.extend(uncharged.iter().map(|r| r.id));
        entry.charged_at = Utc::now();

        let entry = self.store.top_up_usage(entry).await?;
        info!(
            "[批次 {}] 💳 补记 {} 条执行记录 ${:.4}，累计 ${:.4}",
            batch.id,
            uncharged.len(),
            extra,
            entry.amount
        );
        Ok(entry)
    }
}

fn total_cost<'a>(runs: impl Iterator<Item = &'a QuestionRun>) -> f64 {
    runs.map(|r| r.cost).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchScope, Location, QuestionRun};
    use crate::store::InMemoryStore;

    fn run(batch_id: Uuid, question_id: &str, cost: f64) -> QuestionRun {
        QuestionRun {
            id: Uuid::new_v4(),
            batch_id,
            question_id: question_id.into(),
            model: "gpt-4.1".into(),
            location: Location::country("US"),
            response_text: "ok".into(),
            input_tokens: 10,
            output_tokens: 10,
            cost,
            citations: vec![],
            websearch: false,
            usable: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_charge_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let batch = Batch::new(BatchScope::Org("acme".into()), 2, Utc::now());
        store.insert_batch(batch.clone()).await.unwrap();
        store.insert_run(run(batch.id, "q1", 0.25)).await.unwrap();
        store.insert_run(run(batch.id, "q2", 0.5)).await.unwrap();

        let usage = UsageService::new(store.clone());
        let first = usage.charge_batch(&batch).await.unwrap();
        assert_eq!(first.run_count, 2);
        assert!((first.amount - 0.75).abs() < 1e-9);
        assert_eq!(first.scope_key, "org:acme");

        let again = usage.charge_batch(&batch).await.unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_runs_added_by_resume_are_topped_up_once() {
        let store = Arc::new(InMemoryStore::new());
        let batch = Batch::new(BatchScope::Org("acme".into()), 3, Utc::now());
        store.insert_batch(batch.clone()).await.unwrap();
        store.insert_run(run(batch.id, "q1", 0.25)).await.unwrap();

        let usage = UsageService::new(store.clone());
        let first = usage.charge_batch(&batch).await.unwrap();
        assert_eq!(first.run_count, 1);

        // 续跑补上的执行记录计入同一条记录
        store.insert_run(run(batch.id, "q2", 0.5)).await.unwrap();
        store.insert_run(run(batch.id, "q3", 1.0)).await.unwrap();
        let second = usage.charge_batch(&batch).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.run_count, 3);
        assert!((second.amount - 1.75).abs() < 1e-9);
        assert_eq!(second.charged_run_ids.len(), 3);

        let third = usage.charge_batch(&batch).await.unwrap();
        assert_eq!(third, second);
    }
}
