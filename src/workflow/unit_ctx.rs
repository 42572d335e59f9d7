//! 工作单元上下文
//!
//! 封装"我正在处理哪个批次、哪个组合的第几块"这一信息

use std::fmt::Display;
use uuid::Uuid;

/// 工作单元上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 批次ID
    pub batch_id: Uuid,

    /// 组合描述（模型 @ 地区）
    pub pair: String,

    /// 块在组合中的索引（从1开始）
    pub chunk_index: usize,

    /// 组合的总块数
    pub chunk_count: usize,
}

impl UnitCtx {
    pub fn new(batch_id: Uuid, pair: String, chunk_index: usize, chunk_count: usize) -> Self {
        Self {
            batch_id,
            pair,
            chunk_index,
            chunk_count,
        }
    }

    fn short_batch(&self) -> String {
        self.batch_id.simple().to_string().chars().take(8).collect()
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[批次 {} 组合 {} 块 {}/{}]",
            self.short_batch(),
            self.pair,
            self.chunk_index,
            self.chunk_count
        )
    }
}
