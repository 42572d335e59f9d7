//! 异步任务驱动
//!
//! 所有任务型提供方共用的 submit → poll → retrieve 流程。
//!
//! 轮询没有整体超时：提供方处理几十分钟是正常情况，
//! 只有取消信号能中止等待。已被提供方接受的任务不会被撤回。

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AiProvider, ProviderResponse};
use crate::clients::job_client::sleep_or_cancel;
use crate::clients::{JobHandle, JobStatus};
use crate::error::{AppError, AppResult, ProviderError};
use crate::models::{Location, Question};

/// 轮询直到任务进入终态
///
/// - ready：返回 Ok
/// - failed：终态错误
/// - 其他状态：继续轮询
/// - 网络等临时错误：记录后继续轮询，不单独退避
pub async fn wait_for_job(
    provider: &dyn AiProvider,
    handle: &mut JobHandle,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let interval = provider.poll_interval();

    loop {
        sleep_or_cancel(cancel, interval).await?;

        match provider.poll_status(handle, cancel).await {
            Ok(JobStatus::Ready) => {
                info!(
                    "[{}] ✓ 任务 {} 已完成 (轮询 {} 次)",
                    handle.provider, handle.job_id, handle.poll_count
                );
                return Ok(());
            }
            Ok(JobStatus::Failed) => {
                warn!("[{}] ❌ 任务 {} 失败", handle.provider, handle.job_id);
                return Err(ProviderError::JobFailed {
                    job_id: handle.job_id.clone(),
                    message: "提供方报告任务失败".to_string(),
                }
                .into());
            }
            Ok(status) => {
                debug!(
                    "[{}] ⏳ 任务 {} 状态 {:?} (第 {} 次轮询)",
                    handle.provider, handle.job_id, status, handle.poll_count
                );
            }
            Err(e) if e.is_cancelled() || is_unsupported(&e) => return Err(e),
            Err(e) => {
                warn!(
                    "[{}] ⚠️ 轮询任务 {} 出错，将继续重试: {}",
                    handle.provider, handle.job_id, e
                );
            }
        }
    }
}

fn is_unsupported(err: &AppError) -> bool {
    matches!(err, AppError::Provider(ProviderError::Unsupported { .. }))
}

/// 完整执行一个异步任务：提交、轮询、取回并对齐
pub async fn run_job(
    provider: &dyn AiProvider,
    questions: &[Question],
    websearch: bool,
    location: &Location,
    cancel: &CancellationToken,
) -> AppResult<Vec<ProviderResponse>> {
    let mut handle = provider
        .submit_batch(questions, websearch, location, cancel)
        .await?;
    wait_for_job(provider, &mut handle, cancel).await?;
    provider.retrieve_batch(&handle, questions, cancel).await
}
