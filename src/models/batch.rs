//! 批次
//!
//! 每个范围在一个周期窗口内只有一个批次，之后的触发都复用它。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// 批次范围：单个组织或整个网络
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum BatchScope {
    Org(String),
    Network(String),
}

impl BatchScope {
    /// 计费与查找使用的稳定键
    pub fn key(&self) -> String {
        match self {
            BatchScope::Org(id) => format!("org:{}", id),
            BatchScope::Network(id) => format!("network:{}", id),
        }
    }
}

impl Display for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub scope: BatchScope,
    pub status: BatchStatus,
    /// 本批次应执行的组合总数
    pub total_questions: usize,
    pub completed_questions: usize,
    pub failed_questions: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 是否为该范围最新的批次
    pub is_latest: bool,
}

impl Batch {
    /// 创建一个待处理的新批次
    pub fn new(scope: BatchScope, total_questions: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            status: BatchStatus::Pending,
            total_questions,
            completed_questions: 0,
            failed_questions: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            is_latest: true,
        }
    }
}

/// 批次计数增量，只能通过存储层的串行入口应用
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDelta {
    pub completed: usize,
    pub failed: usize,
}
