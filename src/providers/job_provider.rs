//! 任务型提供方
//!
//! ChatGPT / Perplexity / Gemini 共用同一个 `JobClient` 和同一套
//! submit → poll → retrieve 流程，差异只在数据集、目标站点、提示词整形和引用抽取。

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::run_job;
use super::{AiProvider, ProviderResponse};
use crate::clients::job_types::AttachedLink;
use crate::clients::{JobClient, JobHandle, JobInput, JobResult, JobStatus};
use crate::config::JobSettings;
use crate::error::{AppError, AppResult, ConfigError, ProviderError};
use crate::models::{Location, Question};
use crate::services::matching_service::{match_results, EchoedResult};
use crate::services::CostService;
use crate::utils::logging::truncate_text;

/// 任务型提供方家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFamily {
    ChatGpt,
    Perplexity,
    Gemini,
}

impl JobFamily {
    pub fn name(self) -> &'static str {
        match self {
            JobFamily::ChatGpt => "chatgpt",
            JobFamily::Perplexity => "perplexity",
            JobFamily::Gemini => "gemini",
        }
    }

    fn target_url(self) -> &'static str {
        match self {
            JobFamily::ChatGpt => "https://chatgpt.com/",
            JobFamily::Perplexity => "https://www.perplexity.ai",
            JobFamily::Gemini => "https://gemini.google.com/",
        }
    }

    fn dataset_id(self, settings: &JobSettings) -> &str {
        match self {
            JobFamily::ChatGpt => &settings.chatgpt_dataset_id,
            JobFamily::Perplexity => &settings.perplexity_dataset_id,
            JobFamily::Gemini => &settings.gemini_dataset_id,
        }
    }

    /// 实际提交的提示词；ChatGPT 和 Gemini 的地区信息写进提示词
    pub fn submitted_prompt(self, question: &str, location: &Location) -> String {
        match self {
            JobFamily::ChatGpt | JobFamily::Gemini => format!(
                "Ensure your response is localized to {}. Answer the following question: {}",
                location.prompt_label(),
                question
            ),
            JobFamily::Perplexity => question.to_string(),
        }
    }

    /// 从成功条目中生成回答文本和引用链接
    fn render(self, result: &JobResult, answer: &str) -> (String, Vec<String>) {
        match self {
            JobFamily::ChatGpt => {
                let links = result.links_attached.as_deref().unwrap_or_default();
                (link_citation_markers(answer, links), result.citation_list())
            }
            JobFamily::Perplexity => {
                let html = result.answer_html.as_deref().unwrap_or_default();
                let citations = capture_urls(r#"href="([^"]+)""#, html);
                (answer.to_string(), citations)
            }
            JobFamily::Gemini => {
                let citations = capture_urls(r"\]\((https?://[^)\s]+)\)", answer);
                (answer.to_string(), citations)
            }
        }
    }
}

/// 把回答里的 `\[n\]` 和 `[n]` 标记改写为 `[n](url)`
///
/// 未转义的 `[n]` 只在文中还没有 `[n](` 链接时才改写
fn link_citation_markers(answer: &str, links: &[AttachedLink]) -> String {
    let mut text = answer.to_string();
    for link in links {
        let linked = format!("[{}]({})", link.position, link.url);
        text = text.replace(&format!("\\[{}\\]", link.position), &linked);
        if !text.contains(&format!("[{}](", link.position)) {
            text = text.replace(&format!("[{}]", link.position), &linked);
        }
    }
    text
}

fn capture_urls(pattern: &str, text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };
    dedup_http(
        re.captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str())),
    )
}

/// 只保留 http 链接并按首次出现去重
fn dedup_http<'a>(urls: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.filter(|u| u.starts_with("http"))
        .filter(|u| seen.insert(*u))
        .map(str::to_string)
        .collect()
}

impl EchoedResult for JobResult {
    fn echoed_index(&self) -> Option<usize> {
        match self.index {
            Some(i) if i != 0 => Some(i),
            _ => self.input.as_ref().map(|input| input.index),
        }
    }

    fn echoed_prompt(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.input.as_ref().map(|input| input.prompt.as_str()))
    }
}

/// 任务型提供方
pub struct JobProvider {
    family: JobFamily,
    client: Arc<JobClient>,
    dataset_id: String,
    poll_interval: Duration,
    costs: CostService,
}

impl JobProvider {
    /// 创建任务型提供方
    ///
    /// 缺少数据集 ID 或接口密钥时返回配置错误
    pub fn new(
        family: JobFamily,
        client: Arc<JobClient>,
        settings: &JobSettings,
        costs: CostService,
    ) -> AppResult<Self> {
        let dataset_id = family.dataset_id(settings).to_string();
        if dataset_id.is_empty() {
            return Err(ConfigError::MissingCredential(format!(
                "{} 的数据集 ID",
                family.name()
            ))
            .into());
        }
        if settings.api_key.is_empty() {
            return Err(ConfigError::MissingCredential("JOB_API_KEY".to_string()).into());
        }
        Ok(Self {
            family,
            client,
            dataset_id,
            poll_interval: settings.poll_interval,
            costs,
        })
    }

    pub fn family(&self) -> JobFamily {
        self.family
    }

    fn build_inputs(&self, prompts: &[String], websearch: bool, location: &Location) -> Vec<JobInput> {
        let country = location.job_country_code();
        prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| JobInput {
                url: self.family.target_url().to_string(),
                prompt: prompt.clone(),
                country: country.clone(),
                web_search: websearch,
                index: i + 1,
                additional_prompt: String::new(),
            })
            .collect()
    }

    /// 把单条结果转换为回答；提供方报错或回答为空时标记为不可用
    fn convert(&self, result: &JobResult, position: usize) -> ProviderResponse {
        let cost = self.costs.job_flat_cost();

        if let Some(err) = result.error.as_deref().filter(|e| !e.is_empty()) {
            warn!(
                "[{}] ⚠️ 问题 {} 返回错误: {}",
                self.family.name(),
                position,
                err
            );
            return ProviderResponse::failed(err, cost);
        }

        let answer = result.answer_text_markdown.as_deref().unwrap_or_default();
        if answer.trim().is_empty() {
            warn!("[{}] ⚠️ 问题 {} 返回空回答", self.family.name(), position);
            return ProviderResponse::failed("empty answer", cost);
        }

        let (text, citations) = self.family.render(result, answer);
        ProviderResponse {
            text,
            input_tokens: 0,
            output_tokens: 0,
            cost,
            citations,
            usable: true,
            error: None,
        }
    }
}

#[async_trait]
impl AiProvider for JobProvider {
    fn name(&self) -> &str {
        self.family.name()
    }

    fn is_async(&self) -> bool {
        true
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        self.client.max_batch_size()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn execute_one(
        &self,
        question: &Question,
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<ProviderResponse> {
        let mut responses = self
            .execute_batch(std::slice::from_ref(question), websearch, location, cancel)
            .await?;
        responses.pop().ok_or_else(|| {
            ProviderError::ResponseCountMismatch {
                provider: self.name().to_string(),
                expected: 1,
                actual: 0,
            }
            .into()
        })
    }

    async fn execute_batch(
        &self,
        questions: &[Question],
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<ProviderResponse>> {
        run_job(self, questions, websearch, location, cancel).await
    }

    async fn submit_batch(
        &self,
        questions: &[Question],
        websearch: bool,
        location: &Location,
        cancel: &CancellationToken,
    ) -> AppResult<JobHandle> {
        let prompts: Vec<String> = questions
            .iter()
            .map(|q| self.family.submitted_prompt(&q.text, location))
            .collect();
        let inputs = self.build_inputs(&prompts, websearch, location);

        let job_id = self
            .client
            .submit(self.name(), &self.dataset_id, inputs, cancel)
            .await?;
        Ok(JobHandle::new(job_id, self.name(), prompts))
    }

    async fn poll_status(
        &self,
        handle: &mut JobHandle,
        cancel: &CancellationToken,
    ) -> AppResult<JobStatus> {
        handle.poll_count += 1;
        let (status, progress) = self.client.check_progress(&handle.job_id, cancel).await?;
        debug!(
            "[{}] 轮询 #{} 任务 {}: {} (records={:?}, errors={:?})",
            self.name(),
            handle.poll_count,
            handle.job_id,
            progress.status,
            progress.records,
            progress.errors
        );
        Ok(status)
    }

    async fn retrieve_batch(
        &self,
        handle: &JobHandle,
        questions: &[Question],
        cancel: &CancellationToken,
    ) -> AppResult<Vec<ProviderResponse>> {
        if handle.prompts.len() != questions.len() {
            return Err(AppError::matching(format!(
                "任务 {} 提交了 {} 个问题，取回时传入 {} 个",
                handle.job_id,
                handle.prompts.len(),
                questions.len()
            )));
        }

        let results = self
            .client
            .retrieve(self.name(), &handle.job_id, cancel)
            .await?;
        let matched = match_results(results, &handle.prompts)?;
        debug!(
            "[{}] 任务 {} 使用 {:?} 策略匹配",
            self.name(),
            handle.job_id,
            matched.strategy
        );

        let responses: Vec<ProviderResponse> = matched
            .ordered
            .iter()
            .enumerate()
            .map(|(i, result)| self.convert(result, i + 1))
            .collect();

        let usable = responses.iter().filter(|r| r.usable).count();
        info!(
            "[{}] ✅ 任务 {} 完成: {}/{} 条可用，首题: {}",
            self.name(),
            handle.job_id,
            usable,
            responses.len(),
            questions
                .first()
                .map(|q| truncate_text(&q.text, 40))
                .unwrap_or_default()
        );
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostTable;
    use serde_json::json;
    use crate::services::DiagnosticWriter;

    fn provider(family: JobFamily) -> JobProvider {
        let settings = JobSettings {
            api_key: "k".into(),
            chatgpt_dataset_id: "gd_c".into(),
            perplexity_dataset_id: "gd_p".into(),
            gemini_dataset_id: "gd_g".into(),
            ..JobSettings::default()
        };
        let client = JobClient::new(&settings, DiagnosticWriter::default()).unwrap();
        JobProvider::new(
            family,
            Arc::new(client),
            &settings,
            CostService::new(CostTable::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_chatgpt_fixes_escaped_citation_markers() {
        let result = JobResult {
            answer_text_markdown: Some("Use HubSpot \\[1\\] or Pipedrive \\[2\\].".into()),
            links_attached: Some(vec![
                AttachedLink {
                    position: 1,
                    url: "https://hubspot.com".into(),
                },
                AttachedLink {
                    position: 2,
                    url: "https://pipedrive.com".into(),
                },
            ]),
            citations: Some(json!(["https://hubspot.com", "https://pipedrive.com"])),
            ..Default::default()
        };

        let response = provider(JobFamily::ChatGpt).convert(&result, 1);
        assert!(response.usable);
        assert_eq!(
            response.text,
            "Use HubSpot [1](https://hubspot.com) or Pipedrive [2](https://pipedrive.com)."
        );
        assert_eq!(
            response.citations,
            vec!["https://hubspot.com", "https://pipedrive.com"]
        );
        assert_eq!(response.cost, 0.0015);
    }

    #[test]
    fn test_chatgpt_links_bare_markers_and_reads_single_citation() {
        let links = vec![
            AttachedLink {
                position: 1,
                url: "https://hubspot.com".into(),
            },
            AttachedLink {
                position: 2,
                url: "https://pipedrive.com".into(),
            },
        ];
        let result = JobResult {
            answer_text_markdown: Some(
                "HubSpot [1] and Pipedrive [2](https://pipedrive.com) [2].".into(),
            ),
            links_attached: Some(links),
            citations: Some(json!("https://hubspot.com")),
            ..Default::default()
        };

        let response = provider(JobFamily::ChatGpt).convert(&result, 1);
        // [2] 已经有链接，保持原样
        assert_eq!(
            response.text,
            "HubSpot [1](https://hubspot.com) and Pipedrive [2](https://pipedrive.com) [2]."
        );
        assert_eq!(response.citations, vec!["https://hubspot.com"]);
    }

    #[test]
    fn test_perplexity_extracts_href_citations() {
        let result = JobResult {
            answer_text_markdown: Some("answer".into()),
            answer_html: Some(
                r##"<a href="https://a.com">a</a><a href="#ref">x</a><a href="https://a.com">again</a><a href="https://b.com">b</a>"##
                    .into(),
            ),
            ..Default::default()
        };
        let response = provider(JobFamily::Perplexity).convert(&result, 1);
        assert_eq!(response.citations, vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_error_and_empty_entries_are_not_usable() {
        let p = provider(JobFamily::Gemini);
        let errored = JobResult {
            error: Some("captcha".into()),
            ..Default::default()
        };
        let empty = JobResult {
            answer_text_markdown: Some("   ".into()),
            ..Default::default()
        };

        let r1 = p.convert(&errored, 1);
        assert!(!r1.usable);
        assert_eq!(r1.text, super::super::FAILED_RUN_TEXT);
        assert_eq!(r1.error.as_deref(), Some("captcha"));

        let r2 = p.convert(&empty, 2);
        assert!(!r2.usable);
        assert_eq!(r2.error.as_deref(), Some("empty answer"));
    }

    #[test]
    fn test_chatgpt_and_gemini_localize_prompt() {
        let loc = Location {
            country: "us".into(),
            region: Some("Texas".into()),
            city: None,
        };
        let prompt = JobFamily::Gemini.submitted_prompt("best bbq?", &loc);
        assert_eq!(
            prompt,
            "Ensure your response is localized to Texas, United States. Answer the following question: best bbq?"
        );
        assert_eq!(JobFamily::ChatGpt.submitted_prompt("best bbq?", &loc), prompt);
        assert_eq!(
            JobFamily::Perplexity.submitted_prompt("best bbq?", &loc),
            "best bbq?"
        );
    }

    #[test]
    fn test_inputs_carry_one_based_index() {
        let p = provider(JobFamily::ChatGpt);
        let prompts = vec!["a".to_string(), "b".to_string()];
        let inputs = p.build_inputs(&prompts, true, &Location::country("uk"));
        assert_eq!(inputs[0].index, 1);
        assert_eq!(inputs[1].index, 2);
        assert_eq!(inputs[1].country, "GB");
        assert_eq!(inputs[0].url, "https://chatgpt.com/");
    }

    #[test]
    fn test_echoed_index_prefers_top_level() {
        let mut result = JobResult {
            index: Some(0),
            input: Some(JobInput {
                url: String::new(),
                prompt: "p".into(),
                country: "US".into(),
                web_search: false,
                index: 4,
                additional_prompt: String::new(),
            }),
            ..Default::default()
        };
        assert_eq!(result.echoed_index(), Some(4));
        assert_eq!(result.echoed_prompt(), Some("p"));
        result.index = Some(2);
        assert_eq!(result.echoed_index(), Some(2));
    }

    #[test]
    fn test_missing_dataset_id_is_config_error() {
        let settings = JobSettings {
            api_key: "k".into(),
            ..JobSettings::default()
        };
        let client = JobClient::new(&settings, DiagnosticWriter::default()).unwrap();
        let result = JobProvider::new(
            JobFamily::Gemini,
            Arc::new(client),
            &settings,
            CostService::new(CostTable::default()),
        );
        assert!(matches!(result, Err(e) if e.is_resource_level()));
    }
}
