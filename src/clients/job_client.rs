/// 任务型接口客户端
///
/// 封装 submit / progress / snapshot 三个 HTTP 调用，所有任务型提供方共用一个实例。
/// 轮询循环本身在 `providers::job` 中，这里只负责单次调用和取回阶段的重试。
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::job_types::{
    JobInput, JobResult, JobStatus, ProgressResponse, StatusResponse, TriggerRequest,
    TriggerResponse,
};
use crate::config::JobSettings;
use crate::error::{AppError, AppResult, ProviderError};
use crate::services::DiagnosticWriter;

/// 在取消信号到来时放弃等待
pub(crate) async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> AppResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        out = fut => Ok(out),
    }
}

/// 可取消的等待
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> AppResult<()> {
    with_cancel(cancel, tokio::time::sleep(delay)).await
}

/// 任务型接口客户端
#[derive(Debug, Clone)]
pub struct JobClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    submit_max_attempts: u32,
    submit_retry_delay: Duration,
    retrieve_max_attempts: u32,
    retrieve_retry_delay: Duration,
    max_batch_size: usize,
    diagnostics: DiagnosticWriter,
}

impl JobClient {
    /// 创建新的任务型客户端
    pub fn new(settings: &JobSettings, diagnostics: DiagnosticWriter) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AppError::http("client", e))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            submit_max_attempts: settings.submit_max_attempts.max(1),
            submit_retry_delay: settings.submit_retry_delay,
            retrieve_max_attempts: settings.retrieve_max_attempts.max(1),
            retrieve_retry_delay: settings.retrieve_retry_delay,
            max_batch_size: settings.max_batch_size,
            diagnostics,
        })
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// 提交批量任务
    ///
    /// # 参数
    /// - `provider`: 提供方名称（用于日志）
    /// - `dataset_id`: 数据集 ID
    /// - `inputs`: 输入条目，每条带 1-based 位置
    ///
    /// 网络错误或非 200 响应最多尝试 `submit_max_attempts` 次
    ///
    /// # 返回
    /// 返回提供方分配的任务 ID
    pub async fn submit(
        &self,
        provider: &str,
        dataset_id: &str,
        inputs: Vec<JobInput>,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        if inputs.len() > self.max_batch_size {
            return Err(ProviderError::PayloadTooLarge {
                provider: provider.to_string(),
                size: inputs.len(),
                limit: self.max_batch_size,
            }
            .into());
        }
        if inputs.is_empty() {
            return Err(ProviderError::Submit {
                provider: provider.to_string(),
                message: "批量任务不能为空".to_string(),
            }
            .into());
        }

        let url = format!("{}/trigger", self.base_url);
        let count = inputs.len();
        let payload = TriggerRequest { input: inputs };
        info!("[{}] 🚀 提交批量任务: {} 个问题", provider, count);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self
                .http
                .post(&url)
                .query(&[("dataset_id", dataset_id), ("include_errors", "true")])
                .bearer_auth(&self.api_key)
                .json(&payload);

            // 网络错误和非 200 都会重试；200 但响应无法解析直接失败
            let failure: AppError = match with_cancel(cancel, request.send()).await? {
                Err(e) => AppError::http(&url, e),
                Ok(response) if response.status() != StatusCode::OK => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    ProviderError::Submit {
                        provider: provider.to_string(),
                        message: format!("接口返回状态 {}: {}", status.as_u16(), body),
                    }
                    .into()
                }
                Ok(response) => {
                    let trigger: TriggerResponse =
                        response.json().await.map_err(|e| ProviderError::Submit {
                            provider: provider.to_string(),
                            message: format!("无法解析提交响应: {}", e),
                        })?;
                    info!(
                        "[{}] ✓ 任务已提交: {} ({} 个问题)",
                        provider, trigger.snapshot_id, count
                    );
                    return Ok(trigger.snapshot_id);
                }
            };

            if attempt >= self.submit_max_attempts {
                warn!(
                    "[{}] ❌ 提交在 {} 次尝试后仍失败: {}",
                    provider, attempt, failure
                );
                return Err(failure);
            }
            warn!(
                "[{}] ⚠️ 提交失败 ({}/{})，{}s 后重试: {}",
                provider,
                attempt,
                self.submit_max_attempts,
                self.submit_retry_delay.as_secs(),
                failure
            );
            sleep_or_cancel(cancel, self.submit_retry_delay).await?;
        }
    }

    /// 查询任务进度（单次）
    pub async fn check_progress(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<(JobStatus, ProgressResponse)> {
        let url = format!("{}/progress/{}", self.base_url, job_id);
        let request = self.http.get(&url).bearer_auth(&self.api_key);

        let response = with_cancel(cancel, request.send())
            .await?
            .map_err(|e| AppError::http(&url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadStatus {
                endpoint: url,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let progress: ProgressResponse = response
            .json()
            .await
            .map_err(|e| AppError::parse(job_id, format!("进度响应无法解析: {}", e)))?;

        Ok((JobStatus::from_provider(&progress.status), progress))
    }

    /// 取回任务结果
    ///
    /// 结果接口在任务已 ready 后仍可能返回状态对象而不是结果数组：
    /// - `building` 或非 200/202 状态码：等待后重试，最多 `retrieve_max_attempts` 次
    /// - `failed`：立即失败
    /// - 结果数组：成功
    /// - 无法解析：先保存原始响应体，再返回解析错误
    pub async fn retrieve(
        &self,
        provider: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<JobResult>> {
        let url = format!("{}/snapshot/{}", self.base_url, job_id);

        for attempt in 1..=self.retrieve_max_attempts {
            debug!(
                "[{}] 取回结果 {} (第 {}/{} 次)",
                provider, job_id, attempt, self.retrieve_max_attempts
            );

            let request = self
                .http
                .get(&url)
                .query(&[("format", "json")])
                .bearer_auth(&self.api_key);

            let response = with_cancel(cancel, request.send())
                .await?
                .map_err(|e| AppError::http(&url, e))?;

            let status = response.status();
            if status != StatusCode::OK && status != StatusCode::ACCEPTED {
                let body = response.text().await.unwrap_or_default();
                if attempt < self.retrieve_max_attempts {
                    warn!(
                        "[{}] ⚠️ 取回结果返回状态 {} ({}/{})，{}s 后重试",
                        provider,
                        status.as_u16(),
                        attempt,
                        self.retrieve_max_attempts,
                        self.retrieve_retry_delay.as_secs()
                    );
                    sleep_or_cancel(cancel, self.retrieve_retry_delay).await?;
                    continue;
                }
                return Err(ProviderError::BadStatus {
                    endpoint: url,
                    status: status.as_u16(),
                    body,
                }
                .into());
            }

            let body = with_cancel(cancel, response.bytes())
                .await?
                .map_err(|e| AppError::http(&url, e))?;

            let value: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => {
                    return Err(self
                        .parse_failure(provider, job_id, &body, format!("非法 JSON: {}", e))
                        .await)
                }
            };

            if let Some(status_obj) = as_status_object(&value) {
                match JobStatus::from_provider(&status_obj.status) {
                    JobStatus::Building => {
                        if attempt < self.retrieve_max_attempts {
                            info!(
                                "[{}] ⏳ 结果仍在生成中 ({}/{})，{}s 后重试",
                                provider,
                                attempt,
                                self.retrieve_max_attempts,
                                self.retrieve_retry_delay.as_secs()
                            );
                            sleep_or_cancel(cancel, self.retrieve_retry_delay).await?;
                            continue;
                        }
                        warn!(
                            "[{}] ❌ 结果在 {} 次尝试后仍未生成: {}",
                            provider, attempt, job_id
                        );
                        return Err(ProviderError::RetrieveExhausted {
                            job_id: job_id.to_string(),
                            attempts: attempt,
                        }
                        .into());
                    }
                    JobStatus::Failed => {
                        return Err(ProviderError::JobFailed {
                            job_id: job_id.to_string(),
                            message: status_obj.message,
                        }
                        .into());
                    }
                    _ => {
                        return Err(self
                            .parse_failure(
                                provider,
                                job_id,
                                &body,
                                format!("未知的结果状态: {}", status_obj.status),
                            )
                            .await)
                    }
                }
            }

            let results: Vec<JobResult> = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    return Err(self
                        .parse_failure(provider, job_id, &body, format!("结果结构不符: {}", e))
                        .await)
                }
            };

            if results.is_empty() {
                return Err(ProviderError::EmptyResults {
                    job_id: job_id.to_string(),
                }
                .into());
            }

            info!("[{}] ✓ 取回 {} 条结果: {}", provider, results.len(), job_id);
            return Ok(results);
        }

        Err(ProviderError::RetrieveExhausted {
            job_id: job_id.to_string(),
            attempts: self.retrieve_max_attempts,
        }
        .into())
    }

    async fn parse_failure(
        &self,
        provider: &str,
        job_id: &str,
        body: &[u8],
        message: String,
    ) -> AppError {
        warn!("[{}] ❌ 无法解析任务 {} 的结果: {}", provider, job_id, message);
        if let Err(e) = self.diagnostics.save_raw_body(provider, job_id, body).await {
            warn!("[{}] ⚠️ 保存诊断文件失败: {}", provider, e);
        }
        AppError::parse(job_id, message)
    }
}

/// 结构化探测：带 `status` 字段的对象是状态响应，数组是结果
fn as_status_object(value: &Value) -> Option<StatusResponse> {
    let obj = value.as_object()?;
    let status = obj.get("status")?.as_str()?;
    if status.is_empty() {
        return None;
    }
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(StatusResponse {
        status: status.to_string(),
        message,
    })
}
