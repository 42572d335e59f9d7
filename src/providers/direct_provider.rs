//! 直连型提供方
//!
//! 一次请求返回完整答案，不分批，没有异步任务。
//! OpenAI 与 Anthropic 都通过兼容 OpenAI 的接口调用，差异只在凭证和计价家族。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{AiProvider, ProviderResponse};
use crate::clients::LlmClient;
use crate::config::ProviderCredentials;
use crate::error::{AppResult, ConfigError};
use crate::models::{Location, Question};
use crate::services::CostService;

/// 直连型提供方家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectFamily {
    OpenAi,
    Anthropic,
}

impl DirectFamily {
    pub fn name(self) -> &'static str {
        match self {
            DirectFamily::OpenAi => "openai",
            DirectFamily::Anthropic => "anthropic",
        }
    }

    /// 是否支持 `/responses` 联网搜索
    fn has_web_search_api(self) -> bool {
        matches!(self, DirectFamily::OpenAi)
    }
}

/// 在问题前加上地区说明
pub fn location_prompt(question: &str, location: &Location) -> String {
    format!(
        "Answer the following question with specific information relevant to {}:\n\n{}",
        location.prompt_label(),
        question
    )
}

/// 直连型提供方
pub struct DirectProvider {
    family: DirectFamily,
    model: String,
    client: LlmClient,
    costs: CostService,
}

impl DirectProvider {
    /// 创建直连型提供方；缺少 API Key 时返回配置错误
    pub fn new(
        family: DirectFamily,
        model: impl Into<String>,
        credentials: &ProviderCredentials,
        costs: CostService,
    ) -> AppResult<Self> {
        let (key, base, var) = match family {
            DirectFamily::OpenAi => (
                &credentials.openai_api_key,
                &credentials.openai_api_base,
                "OPENAI_API_KEY",
            ),
            DirectFamily::Anthropic => (
                &credentials.anthropic_api_key,
                &credentials.anthropic_api_base,
                "ANTHROPIC_API_KEY",
            ),
        };
        if key.is_empty() {
            return Err(ConfigError::MissingCredential(var.to_string()).into());
        }

        Ok(Self {
            family,
            model: model.into(),
            client: LlmClient::new(key, base),
            costs,
        })
    }
}

#[async_trait]
impl AiProvider for DirectProvider {
    fn name(&self) -> &str {
        self.family.name()
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
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<ProviderResponse> {
        let use_search = websearch && self.family.has_web_search_api();

        let completion = if use_search {
            self.client
                .web_search(&self.model, &question.text, location, cancel)
                .await?
        } else {
            let prompt = location_prompt(&question.text, location);
            self.client.chat(&self.model, &prompt, None, cancel).await?
        };

        let cost = self.costs.token_cost(
            self.family.name(),
            &self.model,
            completion.input_tokens,
            completion.output_tokens,
            use_search,
        );

        if completion.text.is_empty() {
            warn!("[{}] ⚠️ 问题 {} 返回空回答", self.name(), question.id);
            let mut failed = ProviderResponse::failed("empty answer", cost);
            failed.input_tokens = completion.input_tokens;
            failed.output_tokens = completion.output_tokens;
            return Ok(failed);
        }

        info!(
            "[{}] ✓ 问题 {} 完成 ({} in / {} out, ${:.4})",
            self.name(),
            question.id,
            completion.input_tokens,
            completion.output_tokens,
            cost
        );

        Ok(ProviderResponse {
            text: completion.text,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            cost,
            citations: completion.citations,
            usable: true,
            error: None,
        })
    }
}
