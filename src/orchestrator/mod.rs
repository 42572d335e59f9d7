//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责分组、分块和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `run_processor` - 运行处理器
//! - 处理一个范围的一次运行（批次 → 计划 → 调度 → 收尾 → 下游）
//! - 输出全局统计信息
//!
//! ### `batch_orchestrator` - 批次编排器
//! - 按 (模型, 地区) 组合过滤已完成的问题
//! - 按提供方上限分块
//! - 执行单个工作单元并写入执行记录
//!
//! ### `dispatcher` - 并发调度器
//! - 固定数量的 worker 从共享队列取工作单元
//! - 唯一的聚合点更新批次计数
//!
//! ## 层次关系
//!
//! ```text
//! run_processor (处理一个范围)
//!     ↓
//! dispatcher (并发执行 Vec<WorkItem>)
//!     ↓
//! batch_orchestrator (执行单个 WorkItem)
//!     ↓
//! providers (能力层：job / direct)
//!     ↓
//! clients (HTTP：JobClient / LlmClient)
//! ```

pub mod batch_orchestrator;
pub mod dispatcher;
pub mod run_processor;

// 重新导出主要类型
pub use batch_orchestrator::{chunk_questions, BatchOrchestrator, ItemOutcome, Plan, WorkItem};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use run_processor::{RunProcessor, RunSummary};
