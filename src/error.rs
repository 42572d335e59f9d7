//! 错误类型
//!
//! 分层的错误体系：
//! - `ProviderError`：提供方调用链路上的错误（提交、轮询、取回、解析、匹配）
//! - `StoreError`：持久化层错误，属于资源级错误，会中止整个运行
//! - `ConfigError`：配置与运行清单错误
//!
//! 组件内部的错误（单个分块失败、解析失败）由编排层收集，不向上传播；
//! 只有资源级错误才会让整个运行失败。

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 提供方错误
    #[error("提供方错误: {0}")]
    Provider(#[from] ProviderError),
    /// 持久化错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 运行被取消
    #[error("运行已取消")]
    Cancelled,
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 提供方调用错误
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 提交批量任务失败（网络或鉴权问题）
    #[error("[{provider}] 提交批量任务失败: {message}")]
    Submit { provider: String, message: String },

    /// 批量载荷超过提供方上限，本地直接拒绝
    #[error("[{provider}] 批量大小 {size} 超过上限 {limit}")]
    PayloadTooLarge {
        provider: String,
        size: usize,
        limit: usize,
    },

    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// 接口返回了非预期的 HTTP 状态码
    #[error("接口返回异常状态 ({endpoint}): {status} {body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// 任务在提供方侧失败（终态）
    #[error("任务 {job_id} 失败: {message}")]
    JobFailed { job_id: String, message: String },

    /// 结果仍在生成中，重试次数用尽
    #[error("任务 {job_id} 的结果在 {attempts} 次尝试后仍未就绪")]
    RetrieveExhausted { job_id: String, attempts: u32 },

    /// 响应 JSON 无法解析
    #[error("解析任务 {job_id} 的结果失败: {message}")]
    Parse { job_id: String, message: String },

    /// 结果数组为空
    #[error("任务 {job_id} 没有返回任何结果")]
    EmptyResults { job_id: String },

    /// 结果无法与请求对应
    #[error("结果匹配失败: {0}")]
    Match(String),

    /// 返回条数与请求条数不一致
    #[error("[{provider}] 返回 {actual} 条结果，期望 {expected} 条")]
    ResponseCountMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    /// 同步提供方不支持异步操作
    #[error("[{provider}] 不支持操作: {operation}")]
    Unsupported { provider: String, operation: String },

    /// 没有提供方能处理该模型
    #[error("不支持的模型: {0}")]
    UnknownModel(String),

    /// 直连 LLM 调用失败
    #[error("LLM 调用失败 (模型: {model}): {message}")]
    Llm { model: String, message: String },
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 同一 (批次, 题目, 模型, 地区) 的记录已存在
    #[error("运行记录已存在: {0}")]
    DuplicateRun(String),

    /// 批次不存在
    #[error("批次不存在: {0}")]
    BatchNotFound(String),

    /// 读写存储文件失败
    #[error("存储文件读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 事件序列化失败
    #[error("存储事件序列化失败: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 缺少必要的凭证
    #[error("缺少凭证: {0}")]
    MissingCredential(String),

    /// 运行清单无效
    #[error("运行清单无效: {0}")]
    InvalidManifest(String),
}

// ========== 判定辅助函数 ==========

impl AppError {
    /// 是否为取消导致的错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// 是否为资源级错误（需要中止整个运行）
    pub fn is_resource_level(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Config(_))
    }

    /// 是否为重复写入
    pub fn is_duplicate_run(&self) -> bool {
        matches!(self, AppError::Store(StoreError::DuplicateRun(_)))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建网络请求失败错误
    pub fn http(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        AppError::Provider(ProviderError::Http {
            endpoint: endpoint.into(),
            source,
        })
    }

    /// 创建解析失败错误
    pub fn parse(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Provider(ProviderError::Parse {
            job_id: job_id.into(),
            message: message.into(),
        })
    }

    /// 创建结果匹配错误
    pub fn matching(message: impl Into<String>) -> Self {
        AppError::Provider(ProviderError::Match(message.into()))
    }

    /// 创建"不支持的操作"错误
    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        AppError::Provider(ProviderError::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        })
    }

    /// 创建 LLM 调用错误
    pub fn llm(model: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Provider(ProviderError::Llm {
            model: model.into(),
            message: message.into(),
        })
    }

    /// 创建存储 I/O 错误
    pub fn store_io(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Store(StoreError::Io {
            path: path.into(),
            source,
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(StoreError::Serde(err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_level_classification() {
        let store = AppError::Store(StoreError::BatchNotFound("b1".into()));
        assert!(store.is_resource_level());

        let chunk = AppError::Provider(ProviderError::EmptyResults {
            job_id: "s_1".into(),
        });
        assert!(!chunk.is_resource_level());
        assert!(!chunk.is_cancelled());
        assert!(AppError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_duplicate_run_detection() {
        let err = AppError::Store(StoreError::DuplicateRun("q1/gpt-4.1/US".into()));
        assert!(err.is_duplicate_run());
        assert!(err.is_resource_level());
        assert!(err.to_string().contains("q1/gpt-4.1/US"));
    }
}
