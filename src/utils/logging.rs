/// 日志工具模块
///
/// 提供日志初始化和运行级别的格式化输出
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info 级别。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent`: 最大并发数
/// - `scope`: 当前处理的范围
pub fn log_startup(max_concurrent: usize, scope: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量问题执行模式");
    info!("🏷️ 处理范围: {}", scope);
    info!("📊 最大并发数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录运行清单加载信息
pub fn log_manifest_loaded(questions: usize, models: usize, locations: usize) {
    info!(
        "✓ 清单加载完成: {} 个问题 × {} 个模型 × {} 个地区",
        questions, models, locations
    );
    info!("📋 共 {} 个组合待检查", questions * models * locations);
}

/// 记录 (模型, 地区) 组合开始信息
///
/// # 参数
/// - `pair`: 组合描述
/// - `pending`: 待执行问题数
/// - `skipped`: 已存在而跳过的问题数
/// - `chunks`: 分块数量
pub fn log_pair_start(pair: &str, pending: usize, skipped: usize, chunks: usize) {
    info!("\n{}", "─".repeat(60));
    info!("📦 组合 {}", pair);
    info!(
        "📄 待执行 {} 个 / 已完成跳过 {} 个 / 分 {} 块",
        pending, skipped, chunks
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `succeeded`: 成功数量
/// - `failed`: 失败数量
/// - `skipped`: 已完成而跳过的数量
/// - `cost`: 本次运行产生的费用
/// - `errors`: 组合级错误列表
pub fn print_final_stats(
    succeeded: usize,
    failed: usize,
    skipped: usize,
    cost: f64,
    errors: &[String],
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}", succeeded);
    info!("❌ 失败: {}", failed);
    info!("⏭️ 跳过（已完成）: {}", skipped);
    info!("💰 费用: ${:.4}", cost);
    if !errors.is_empty() {
        warn!("⚠️ 共 {} 个组合级错误:", errors.len());
        for e in errors {
            warn!("   - {}", e);
        }
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        // 按字符而不是字节截断
        assert_eq!(truncate_text("北京上海广州", 2), "北京...");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }
}
