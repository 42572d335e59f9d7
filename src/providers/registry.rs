//! 提供方注册表
//!
//! 按模型名（小写子串）路由到提供方，每个模型名只构造一次。
//! 匹配顺序：chatgpt → perplexity/sonar → gemini → gpt/4.1 → claude/sonnet/opus/haiku

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{AiProvider, DirectFamily, DirectProvider, JobFamily, JobProvider};
use crate::clients::JobClient;
use crate::config::Config;
use crate::error::{AppError, AppResult, ProviderError};
use crate::services::{CostService, DiagnosticWriter};

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Job(JobFamily),
    Direct(DirectFamily),
}

/// 路由规则表，按顺序匹配
const RULES: &[(&[&str], ProviderKind)] = &[
    (&["chatgpt"], ProviderKind::Job(JobFamily::ChatGpt)),
    (&["perplexity", "sonar"], ProviderKind::Job(JobFamily::Perplexity)),
    (&["gemini"], ProviderKind::Job(JobFamily::Gemini)),
    (&["gpt", "4.1"], ProviderKind::Direct(DirectFamily::OpenAi)),
    (
        &["claude", "sonnet", "opus", "haiku"],
        ProviderKind::Direct(DirectFamily::Anthropic),
    ),
];

/// 根据模型名判断提供方类型
pub fn classify_model(model: &str) -> Option<ProviderKind> {
    let lower = model.trim().to_lowercase();
    RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, kind)| *kind)
}

/// 提供方注册表
pub struct ProviderRegistry {
    config: Config,
    job_client: Arc<JobClient>,
    costs: CostService,
    cache: Mutex<HashMap<String, Arc<dyn AiProvider>>>,
}

impl ProviderRegistry {
    pub fn new(config: &Config) -> AppResult<Self> {
        let diagnostics = DiagnosticWriter::with_dir(&config.diagnostics_dir);
        let job_client = JobClient::new(&config.job, diagnostics)?;
        Ok(Self {
            config: config.clone(),
            job_client: Arc::new(job_client),
            costs: CostService::new(config.costs.clone()),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// 手动注册提供方（优先于路由规则）
    pub fn register(&self, model: impl Into<String>, provider: Arc<dyn AiProvider>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(model.into(), provider);
        }
    }

    /// 获取模型对应的提供方
    ///
    /// - 未知模型：`ProviderError::UnknownModel`（组合级错误）
    /// - 缺少凭证：`ConfigError`（资源级错误）
    pub fn resolve(&self, model: &str) -> AppResult<Arc<dyn AiProvider>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AppError::Other("提供方缓存锁已损坏".to_string()))?;

        if let Some(provider) = cache.get(model) {
            return Ok(provider.clone());
        }

        let kind = classify_model(model)
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;

        let provider: Arc<dyn AiProvider> = match kind {
            ProviderKind::Job(family) => Arc::new(JobProvider::new(
                family,
                self.job_client.clone(),
                &self.config.job,
                self.costs.clone(),
            )?),
            ProviderKind::Direct(family) => Arc::new(DirectProvider::new(
                family,
                model,
                &self.config.credentials,
                self.costs.clone(),
            )?),
        };

        info!("🔌 模型 {} → 提供方 {}", model, provider.name());
        cache.insert(model.to_string(), provider.clone());
        Ok(provider)
    }
}
