use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

use crate::models::Location;

/// 一次执行的唯一键：(批次, 问题, 模型, 地区)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub batch_id: Uuid,
    pub question_id: String,
    pub model: String,
    pub location: Location,
}

impl Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.batch_id, self.question_id, self.model, self.location
        )
    }
}

/// 问题执行记录
///
/// 每个组合在同一批次内只写一次；已存在即代表"已完成"，不会被更新或删除。
/// 提供方报告失败的条目同样会被记录，`usable = false`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRun {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub question_id: String,
    pub model: String,
    pub location: Location,
    pub response_text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    #[serde(default)]
    pub citations: Vec<String>,
    pub websearch: bool,
    /// 是否应进行下游抽取
    pub usable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QuestionRun {
    pub fn key(&self) -> RunKey {
        RunKey {
            batch_id: self.batch_id,
            question_id: self.question_id.clone(),
            model: self.model.clone(),
            location: self.location.clone(),
        }
    }
}
