//! 提供方层
//!
//! ## 职责
//!
//! 每个提供方家族实现统一的 `AiProvider` 能力接口，负责各自的请求/响应整形、
//! 引用链接抽取和费用计算。
//!
//! ## 家族划分
//!
//! ### 任务型（`job_provider`）
//! - ChatGPT / Perplexity / Gemini，共用一个 `JobClient`
//! - submit → poll → retrieve，支持批量
//!
//! ### 直连型（`direct_provider`）
//! - OpenAI / Anthropic，一次调用返回完整答案
//! - 不支持批量，也不支持异步操作
//!
//! 调用方在使用 `submit_batch` / `poll_status` / `retrieve_batch` 前必须先检查 `is_async()`。

pub mod direct_provider;
pub mod job;
pub mod job_provider;
pub mod registry;

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clients::{JobHandle, JobStatus};
use crate::error::{AppError, AppResult};
use crate::models::{Location, Question};

pub use direct_provider::{DirectFamily, DirectProvider};
pub use job_provider::{JobFamily, JobProvider};
pub use registry::ProviderRegistry;

/// 提供方失败条目使用的占位回答
pub const FAILED_RUN_TEXT: &str = "Question run failed for this model and location";

/// 提供方返回的单条回答
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub citations: Vec<String>,
    /// 是否应进行下游抽取；提供方报错或回答为空时为 false
    pub usable: bool,
    /// 提供方报告的单条错误
    pub error: Option<String>,
}

impl ProviderResponse {
    /// 单条失败：调用已发生（可能已计费），但没有可用内容
    pub fn failed(error: impl Into<String>, cost: f64) -> Self {
        Self {
            text: FAILED_RUN_TEXT.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cost,
            citations: Vec::new(),
            usable: false,
            error: Some(error.into()),
        }
    }
}

/// 提供方能力接口
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 稳定标识，用于计费和日志
    fn name(&self) -> &str;

    /// 是否需要 submit → poll → retrieve
    fn is_async(&self) -> bool;

    fn supports_batching(&self) -> bool;

    /// 单批上限；0 或 1 表示不分批
    fn max_batch_size(&self) -> usize;

    /// 异步任务的轮询间隔
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// 执行单个问题，所有提供方都支持
    async fn execute_one(
        &self,
        question: &Question,
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<ProviderResponse>;

    /// 批量执行；返回顺序与输入一致
    ///
    /// 默认实现逐个调用 `execute_one`
    async fn execute_batch(
        &self,
        questions: &[Question],
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<ProviderResponse>> {
        let mut responses = Vec::with_capacity(questions.len());
        for question in questions {
            responses.push(
                self.execute_one(question, websearch, location, cancel)
                    .await?,
            );
        }
        Ok(responses)
    }

    async fn submit_batch(
        &self,
        _questions: &[Question],
        _websearch: bool,
        _location: &Location,
        _cancel: &CancellationToken,
    ) -> AppResult<JobHandle> {
        Err(AppError::unsupported(self.name(), "submit_batch"))
    }

    async fn poll_status(
        &self,
        _handle: &mut JobHandle,
        _cancel: &CancellationToken,
    ) -> AppResult<JobStatus> {
        Err(AppError::unsupported(self.name(), "poll_status"))
    }

    /// 取回并按输入顺序对齐结果
    async fn retrieve_batch(
        &self,
        _handle: &JobHandle,
        _questions: &[Question],
        _cancel: &CancellationToken,
    ) -> AppResult<Vec<ProviderResponse>> {
        Err(AppError::unsupported(self.name(), "retrieve_batch"))
    }
}
