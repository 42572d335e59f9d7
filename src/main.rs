use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use question_batch_runner::models::load_manifest;
use question_batch_runner::utils::logging;
use question_batch_runner::{Config, JsonlStore, ProviderRegistry, RunProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);

    // 加载运行清单
    let manifest = load_manifest(Path::new(&config.manifest_path)).await?;

    // 打开状态存储（重放之前的事件）
    let store = Arc::new(
        JsonlStore::open(&config.state_dir)
            .await
            .context("无法打开状态存储")?,
    );
    info!("📂 状态文件: {}", store.path().display());

    let registry = Arc::new(ProviderRegistry::new(&config).context("无法创建提供方注册表")?);

    // Ctrl+C 时取消运行，正在轮询的任务会尽快退出
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 收到 Ctrl+C，正在停止...");
                trigger.cancel();
            }
            Err(err) => error!("无法监听 Ctrl+C: {}", err),
        }
    });

    let processor = RunProcessor::new(config, store, registry);
    let summary = processor.run(&manifest, &cancel).await?;

    if summary.interrupted {
        warn!("⏸️ 运行已中断，再次执行将从批次 {} 继续", summary.batch_id);
    } else {
        info!(
            "🏁 批次 {} 结束，状态 {:?}",
            summary.batch_id, summary.status
        );
    }

    Ok(())
}
