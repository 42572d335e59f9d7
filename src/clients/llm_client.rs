//! LLM API 客户端
//!
//! 封装直连型提供方的两种调用：
//! - 普通对话：使用 `async-openai`，兼容 OpenAI API 的服务都可以接入
//! - 联网搜索：调用 `/responses` 接口并启用 `web_search_preview` 工具

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clients::job_client::with_cancel;
use crate::error::{AppError, AppResult};
use crate::models::Location;

/// 一次 LLM 调用的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub citations: Vec<String>,
}

/// LLM 客户端
#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(api_key: &str, api_base: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Self {
            client: Client::with_config(openai_config),
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// 发送聊天请求
    ///
    /// # 参数
    /// - `model`: 模型名称
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回回答内容和 token 用量
    pub async fn chat(
        &self,
        model: &str,
        user_message: &str,
        system_message: Option<&str>,
        cancel: &CancellationToken,
    ) -> AppResult<LlmCompletion> {
        debug!("调用 LLM API，模型: {}", model);
        debug!("用户消息长度: {} 字符", user_message.len());

        let llm_err = |e: async_openai::error::OpenAIError| AppError::llm(model, e.to_string());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(llm_err)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(llm_err)?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()
            .map_err(llm_err)?;

        let response = with_cancel(cancel, self.client.chat().create(request))
            .await?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                llm_err(e)
            })?;

        debug!("LLM API 调用成功");

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let (input_tokens, output_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(LlmCompletion {
            text: text.trim().to_string(),
            input_tokens,
            output_tokens,
            citations: Vec::new(),
        })
    }

    /// 联网搜索请求
    ///
    /// 地区信息通过工具参数传递，不写进提示词
    pub async fn web_search(
        &self,
        model: &str,
        user_message: &str,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<LlmCompletion> {
        let url = format!("{}/responses", self.api_base);
        let loc = location.normalized();
        let body = WebSearchRequest {
            model: model.to_string(),
            input: user_message.to_string(),
            tools: vec![WebSearchTool {
                kind: "web_search_preview".to_string(),
                user_location: WebUserLocation {
                    kind: "approximate".to_string(),
                    country: loc.country,
                    region: loc.region,
                    city: loc.city,
                },
            }],
        };

        debug!("调用联网搜索 API，模型: {}", model);
        let request = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
        let response = with_cancel(cancel, request.send())
            .await?
            .map_err(|e| AppError::http(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::llm(
                model,
                format!("联网搜索接口返回状态 {}: {}", status.as_u16(), text),
            ));
        }

        let parsed: WebSearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::llm(model, format!("无法解析联网搜索响应: {}", e)))?;

        Ok(parsed.into_completion())
    }
}

#[derive(Debug, Serialize)]
struct WebSearchRequest {
    model: String,
    input: String,
    tools: Vec<WebSearchTool>,
}

#[derive(Debug, Serialize)]
struct WebSearchTool {
    #[serde(rename = "type")]
    kind: String,
    user_location: WebUserLocation,
}

#[derive(Debug, Serialize)]
struct WebUserLocation {
    #[serde(rename = "type")]
    kind: String,
    country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebSearchResponse {
    #[serde(default)]
    output: Vec<WebSearchOutputItem>,
    #[serde(default)]
    usage: WebSearchUsage,
}

#[derive(Debug, Deserialize)]
struct WebSearchOutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<WebSearchContent>,
}

#[derive(Debug, Deserialize)]
struct WebSearchContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    annotations: Vec<WebSearchAnnotation>,
}

#[derive(Debug, Deserialize)]
struct WebSearchAnnotation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebSearchUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl WebSearchResponse {
    /// 取第一条 message 的 output_text，引用来自其 url_citation 标注
    fn into_completion(self) -> LlmCompletion {
        let content = self
            .output
            .into_iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content)
            .find(|c| c.kind == "output_text" && !c.text.is_empty());

        let (text, citations) = match content {
            Some(c) => {
                let mut urls: Vec<String> = Vec::new();
                for url in c
                    .annotations
                    .into_iter()
                    .filter(|a| a.kind == "url_citation")
                    .filter_map(|a| a.url)
                {
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
                (c.text, urls)
            }
            None => (String::new(), Vec::new()),
        };

        LlmCompletion {
            text: text.trim().to_string(),
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_web_search_response_extraction() {
        let raw = json!({
            "output": [
                {"type": "web_search_call", "status": "completed"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": " Try Acme CRM. ", "annotations": [
                        {"type": "url_citation", "url": "https://acme.com"},
                        {"type": "url_citation", "url": "https://acme.com"},
                        {"type": "file_citation"}
                    ]}
                ]}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 45}
        });
        let parsed: WebSearchResponse = serde_json::from_value(raw).unwrap();
        let completion = parsed.into_completion();
        assert_eq!(completion.text, "Try Acme CRM.");
        assert_eq!(completion.citations, vec!["https://acme.com"]);
        assert_eq!(completion.input_tokens, 120);
    }

    #[tokio::test]
    async fn test_web_search_sends_user_location() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4.1",
                "tools": [{"type": "web_search_preview", "user_location": {"type": "approximate", "country": "GB", "city": "London"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "ok"}]}],
                "usage": {"input_tokens": 1, "output_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new("sk-test", &server.uri());
        let location = Location {
            country: "uk".into(),
            region: None,
            city: Some("London".into()),
        };
        let completion = client
            .web_search("gpt-4.1", "best tea?", &location, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.output_tokens, 2);
    }

    /// 需要真实凭证：OPENAI_API_KEY
    #[tokio::test]
    #[ignore]
    async fn test_chat_live() {
        let _ = tracing_subscriber::fmt::try_init();

        let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let client = LlmClient::new(&key, "https://api.openai.com/v1");
        let completion = client
            .chat("gpt-4.1-mini", "Say hello in one word.", None, &CancellationToken::new())
            .await
            .unwrap();
        println!("LLM 响应: {}", completion.text);
        assert!(!completion.text.is_empty());
    }
}
