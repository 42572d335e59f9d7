use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

/// 程序配置
///
/// 显式构造后注入到各个组件，不使用任何全局状态
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时执行的工作单元数量
    pub max_concurrent_units: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 运行状态存放目录
    pub state_dir: String,
    /// 诊断文件（无法解析的原始响应）存放目录
    pub diagnostics_dir: String,
    /// 运行清单路径
    pub manifest_path: String,
    /// 默认是否开启联网搜索
    pub websearch: bool,
    /// 批次复用窗口
    pub cycle_window: CycleWindow,
    // --- 任务型提供方配置 ---
    pub job: JobSettings,
    // --- 直连型提供方凭证 ---
    pub credentials: ProviderCredentials,
    // --- 计费表 ---
    pub costs: CostTable,
}

/// 任务型提供方（submit → poll → retrieve）的公共参数
#[derive(Clone, Debug)]
pub struct JobSettings {
    pub base_url: String,
    pub api_key: String,
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 提交失败（网络错误或非 200）时的最大尝试次数
    pub submit_max_attempts: u32,
    pub submit_retry_delay: Duration,
    /// 结果仍在生成时的最大取回次数
    pub retrieve_max_attempts: u32,
    /// 两次取回之间的等待时间
    pub retrieve_retry_delay: Duration,
    /// 单个任务最多包含的题目数
    pub max_batch_size: usize,
    /// 单次 HTTP 请求超时
    pub request_timeout: Duration,
    pub chatgpt_dataset_id: String,
    pub perplexity_dataset_id: String,
    pub gemini_dataset_id: String,
}

/// 直连型提供方的凭证
#[derive(Clone, Debug, Default)]
pub struct ProviderCredentials {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub anthropic_api_key: String,
    pub anthropic_api_base: String,
}

/// 批次复用窗口：同一范围在窗口内只创建一个批次
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleWindow {
    Daily,
    Weekly,
}

impl std::str::FromStr for CycleWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(CycleWindow::Daily),
            "weekly" | "week" => Ok(CycleWindow::Weekly),
            other => Err(format!("未知的批次窗口: {}", other)),
        }
    }
}

/// 单个模型的 token 单价（每百万 token，美元）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// 计费表
#[derive(Clone, Debug)]
pub struct CostTable {
    /// 模型 → token 单价
    pub models: HashMap<String, TokenPrice>,
    /// 未知模型回退使用的模型名
    pub fallback_model: String,
    /// 提供方家族 → 每千次联网搜索价格
    pub websearch_per_thousand: HashMap<String, f64>,
    /// 任务型提供方按条计费的单价
    pub job_flat_per_call: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        let price = |i: f64, o: f64| TokenPrice {
            input_per_million: i,
            output_per_million: o,
        };
        let models = HashMap::from([
            ("gpt-5".to_string(), price(1.25, 10.0)),
            ("gpt-5-mini".to_string(), price(0.25, 2.0)),
            ("gpt-4.1".to_string(), price(3.0, 12.0)),
            ("gpt-4.1-mini".to_string(), price(0.8, 3.2)),
            ("gpt-4o-2024-08-06".to_string(), price(2.5, 10.0)),
            ("claude-sonnet-4-20250514".to_string(), price(3.0, 15.0)),
            ("sonar".to_string(), price(1.0, 1.0)),
        ]);
        let websearch_per_thousand = HashMap::from([
            ("openai".to_string(), 35.0),
            ("anthropic".to_string(), 10.0),
            ("perplexity".to_string(), 8.0),
        ]);
        Self {
            models,
            fallback_model: "gpt-4.1".to_string(),
            websearch_per_thousand,
            job_flat_per_call: 0.0015,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.brightdata.com/datasets/v3".to_string(),
            api_key: String::new(),
            poll_interval: Duration::from_secs(10),
            submit_max_attempts: 5,
            submit_retry_delay: Duration::from_secs(2),
            retrieve_max_attempts: 20,
            retrieve_retry_delay: Duration::from_secs(30),
            max_batch_size: 20,
            request_timeout: Duration::from_secs(1200),
            chatgpt_dataset_id: String::new(),
            perplexity_dataset_id: String::new(),
            gemini_dataset_id: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_units: 20,
            verbose_logging: false,
            state_dir: "state".to_string(),
            diagnostics_dir: "diagnostics".to_string(),
            manifest_path: "run.toml".to_string(),
            websearch: true,
            cycle_window: CycleWindow::Daily,
            job: JobSettings::default(),
            credentials: ProviderCredentials {
                openai_api_base: "https://api.openai.com/v1".to_string(),
                anthropic_api_base: "https://api.anthropic.com/v1".to_string(),
                ..Default::default()
            },
            costs: CostTable::default(),
        }
    }
}

/// 读取并解析环境变量；无法解析时记录警告并使用默认值
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            let err = ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            };
            warn!("⚠️ {}，使用默认值", err);
            None
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        let job = default.job;
        let creds = default.credentials;
        Self {
            max_concurrent_units: env_parse("MAX_CONCURRENT_UNITS").unwrap_or(default.max_concurrent_units),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            state_dir: std::env::var("STATE_DIR").unwrap_or(default.state_dir),
            diagnostics_dir: std::env::var("DIAGNOSTICS_DIR").unwrap_or(default.diagnostics_dir),
            manifest_path: std::env::var("RUN_MANIFEST").unwrap_or(default.manifest_path),
            websearch: env_parse("WEB_SEARCH").unwrap_or(default.websearch),
            cycle_window: env_parse("CYCLE_WINDOW").unwrap_or(default.cycle_window),
            job: JobSettings {
                base_url: std::env::var("JOB_API_BASE_URL").unwrap_or(job.base_url),
                api_key: std::env::var("JOB_API_KEY").unwrap_or(job.api_key),
                poll_interval: env_secs("JOB_POLL_INTERVAL_SECS").unwrap_or(job.poll_interval),
                submit_max_attempts: env_parse("JOB_SUBMIT_MAX_ATTEMPTS").unwrap_or(job.submit_max_attempts),
                submit_retry_delay: env_secs("JOB_SUBMIT_RETRY_DELAY_SECS").unwrap_or(job.submit_retry_delay),
                retrieve_max_attempts: env_parse("JOB_RETRIEVE_MAX_ATTEMPTS").unwrap_or(job.retrieve_max_attempts),
                retrieve_retry_delay: env_secs("JOB_RETRIEVE_RETRY_DELAY_SECS").unwrap_or(job.retrieve_retry_delay),
                max_batch_size: env_parse("JOB_MAX_BATCH_SIZE").unwrap_or(job.max_batch_size),
                request_timeout: env_secs("JOB_REQUEST_TIMEOUT_SECS").unwrap_or(job.request_timeout),
                chatgpt_dataset_id: std::env::var("CHATGPT_DATASET_ID").unwrap_or(job.chatgpt_dataset_id),
                perplexity_dataset_id: std::env::var("PERPLEXITY_DATASET_ID").unwrap_or(job.perplexity_dataset_id),
                gemini_dataset_id: std::env::var("GEMINI_DATASET_ID").unwrap_or(job.gemini_dataset_id),
            },
            credentials: ProviderCredentials {
                openai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or(creds.openai_api_key),
                openai_api_base: std::env::var("OPENAI_API_BASE").unwrap_or(creds.openai_api_base),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or(creds.anthropic_api_key),
                anthropic_api_base: std::env::var("ANTHROPIC_API_BASE").unwrap_or(creds.anthropic_api_base),
            },
            costs: default.costs,
        }
    }
}
