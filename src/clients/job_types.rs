//! 任务型接口的报文结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 提交请求体：`{"input": [...]}`
#[derive(Debug, Clone, Serialize)]
pub struct TriggerRequest {
    pub input: Vec<JobInput>,
}

/// 单个问题的输入条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub web_search: bool,
    /// 1-based 位置，用于结果匹配
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub additional_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerResponse {
    pub snapshot_id: String,
}

/// 进度查询响应
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    pub status: String,
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub records: Option<u64>,
    #[serde(default)]
    pub errors: Option<u64>,
    #[serde(default)]
    pub collection_duration: Option<u64>,
}

/// 取回结果时可能返回的状态对象（结果尚未生成完毕）
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// ChatGPT 返回的附带链接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedLink {
    #[serde(default)]
    pub position: u32,
    pub url: String,
}

/// 单条结果
///
/// 各家族共用一个结构，字段按需出现；失败条目通常只有 `error` 和 `input`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub answer_text_markdown: Option<String>,
    #[serde(default)]
    pub answer_html: Option<String>,
    #[serde(default)]
    pub links_attached: Option<Vec<AttachedLink>>,
    /// 字符串数组或单个字符串
    #[serde(default)]
    pub citations: Option<Value>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub input: Option<JobInput>,
}

impl JobResult {
    /// 结果自带的引用链接，忽略空串和非字符串条目
    pub fn citation_list(&self) -> Vec<String> {
        match &self.citations {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// 任务的逻辑状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Building,
    Ready,
    Failed,
}

impl JobStatus {
    /// 将提供方的状态字符串映射为逻辑状态；未知状态视为仍在运行
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "ready" => JobStatus::Ready,
            "failed" => JobStatus::Failed,
            "building" => JobStatus::Building,
            _ => JobStatus::Running,
        }
    }
}

/// 已提交任务的句柄，仅存在于内存中
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub provider: String,
    pub submitted_at: DateTime<Utc>,
    /// 仅用于日志
    pub poll_count: u32,
    /// 实际提交的提示词（按提交顺序），用于按提示词回退匹配
    pub prompts: Vec<String>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, provider: impl Into<String>, prompts: Vec<String>) -> Self {
        Self {
            job_id: job_id.into(),
            provider: provider.into(),
            submitted_at: Utc::now(),
            poll_count: 0,
            prompts,
        }
    }
}
