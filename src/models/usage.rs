use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// 计费记录，按 (批次, 范围) 唯一
///
/// 续跑新增的执行记录会补记到同一条记录上，`charged_run_ids` 保证每条执行记录只计一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// `BatchScope::key()`
    pub scope_key: String,
    pub run_count: usize,
    pub amount: f64,
    /// 已计费的执行记录
    #[serde(default)]
    pub charged_run_ids: BTreeSet<Uuid>,
    pub charged_at: DateTime<Utc>,
}
