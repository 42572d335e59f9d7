//! 诊断文件写入服务
//!
//! 只负责"把无法解析的原始响应落盘"，不关心调用方流程

use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// 诊断文件写入服务
///
/// 文件名为 `{provider}_error_{job_id}.txt`，同一任务重复写入会覆盖
#[derive(Debug, Clone)]
pub struct DiagnosticWriter {
    dir: PathBuf,
}

impl DiagnosticWriter {
    /// 使用自定义目录创建
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 诊断文件路径
    pub fn path_for(&self, provider: &str, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}_error_{}.txt", provider, sanitize(job_id)))
    }

    /// 写入原始响应体
    ///
    /// # 返回
    /// 返回写入的文件路径
    pub async fn save_raw_body(
        &self,
        provider: &str,
        job_id: &str,
        body: &[u8],
    ) -> AppResult<PathBuf> {
        debug!(
            "写入诊断文件: 提供方 {} | 任务 {} | 长度: {}",
            provider,
            job_id,
            body.len()
        );

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::store_io(self.dir.display().to_string(), e))?;

        let path = self.path_for(provider, job_id);
        fs::write(&path, body)
            .await
            .map_err(|e| AppError::store_io(path.display().to_string(), e))?;

        warn!("📝 原始响应已保存至: {}", path.display());
        Ok(path)
    }
}

impl Default for DiagnosticWriter {
    fn default() -> Self {
        Self::with_dir("diagnostics")
    }
}

/// 任务 ID 来自外部，只保留可安全用于文件名的字符
fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DiagnosticWriter::with_dir(dir.path().join("diag"));

        let path = writer
            .save_raw_body("chatgpt", "s_abc/../x", b"<html>oops</html>")
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "chatgpt_error_s_abc____x.txt");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "<html>oops</html>");
    }
}
