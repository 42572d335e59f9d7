use crate::error::{AppResult, ConfigError};
use crate::models::{BatchScope, Location, Question};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

/// 运行清单
///
/// ```toml
/// scope = { kind = "org", id = "acme" }
/// websearch = true
/// models = ["chatgpt", "gpt-4.1"]
///
/// [[locations]]
/// country = "US"
/// region = "Texas"
///
/// [[questions]]
/// id = "q1"
/// text = "What is the best CRM for startups?"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RunManifest {
    pub scope: BatchScope,
    /// 缺省时使用配置中的默认值
    #[serde(default)]
    pub websearch: Option<bool>,
    pub models: Vec<String>,
    pub locations: Vec<Location>,
    pub questions: Vec<Question>,
}

impl RunManifest {
    /// 校验清单：模型、地区、问题都不能为空，问题 ID 不能重复
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| -> AppResult<()> {
            Err(ConfigError::InvalidManifest(msg).into())
        };
        if self.models.is_empty() {
            return invalid("models 不能为空".to_string());
        }
        if self.locations.is_empty() {
            return invalid("locations 不能为空".to_string());
        }
        if self.questions.is_empty() {
            return invalid("questions 不能为空".to_string());
        }
        let mut seen = HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.id.as_str()) {
                return invalid(format!("问题 ID 重复: {}", q.id));
            }
        }
        Ok(())
    }
}

/// 从 TOML 文件加载运行清单
pub async fn load_manifest(path: &Path) -> Result<RunManifest> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取运行清单: {}", path.display()))?;

    let manifest: RunManifest = toml::from_str(&content)
        .with_context(|| format!("无法解析运行清单: {}", path.display()))?;

    manifest
        .validate()
        .with_context(|| format!("运行清单校验失败: {}", path.display()))?;

    tracing::info!(
        "成功加载运行清单 {} ({})",
        path.display(),
        manifest.scope
    );

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
scope = { kind = "org", id = "acme" }
models = ["chatgpt", "gpt-4.1"]

[[locations]]
country = "us"
region = "Texas"

[[questions]]
id = "q1"
text = "Best CRM for startups?"

[[questions]]
id = "q2"
text = "Best project tracker?"
"#;

    #[tokio::test]
    async fn test_load_manifest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let manifest = load_manifest(file.path()).await.unwrap();
        assert_eq!(manifest.scope, BatchScope::Org("acme".into()));
        assert_eq!(manifest.models.len(), 2);
        assert_eq!(manifest.questions[1].id, "q2");
        assert_eq!(manifest.locations[0].region.as_deref(), Some("Texas"));
        assert_eq!(manifest.websearch, None);
    }

    #[test]
    fn test_duplicate_question_ids_rejected() {
        let mut manifest: RunManifest = toml::from_str(SAMPLE).unwrap();
        manifest.questions[1].id = "q1".into();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("q1"));
    }
}
