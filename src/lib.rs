//! # Question Batch Runner
//!
//! 针对多个 AI 回答提供方批量执行问题，并支持断点续跑的执行引擎
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 只负责 HTTP 往返，不含业务判断
//! - `JobClient` - 任务型接口的 submit / progress / snapshot
//! - `LlmClient` - 直连型接口的对话与联网搜索
//!
//! ### ② 提供方层（Providers）
//! - `providers/` - 统一的 `AiProvider` 能力接口
//! - `JobProvider` - ChatGPT / Perplexity / Gemini（submit → poll → retrieve）
//! - `DirectProvider` - OpenAI / Anthropic（一次调用返回答案）
//! - `ProviderRegistry` - 按模型名路由，每个模型只构造一次
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 结果匹配、续跑检查、计费、费用计算、诊断文件
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 下游抽取流程 `ExtractionFlow` 与工作单元上下文 `UnitCtx`
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/run_processor` - 一个范围的一次运行
//! - `orchestrator/dispatcher` - 有界并发调度
//! - `orchestrator/batch_orchestrator` - 分组、分块、执行、落库
//!
//! 持久化通过 `store::RunStore` 接口访问；执行记录只追加，是续跑的依据。
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Batch, BatchScope, Location, ModelLocationPair, Question, QuestionRun, RunManifest};
pub use orchestrator::{RunProcessor, RunSummary};
pub use providers::{AiProvider, ProviderRegistry, ProviderResponse};
pub use store::{InMemoryStore, JsonlStore, RunStore};
pub use workflow::{ExtractionFlow, Extractor};
