/// 结果匹配服务
///
/// 负责把提供方返回的结果还原为提交时的顺序。
///
/// 1. 按位置匹配：每条结果回传提交时的 1-based 位置（失败条目回传在 `input` 里）。
///    只有当 1..=N 每个位置恰好出现一次时才采用。
/// 2. 按提示词匹配：任何位置异常都整体放弃位置信息，改为按回传的提示词文本精确查找；
///    任何一个问题找不到结果即整批失败。
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// 能够回传提交信息的结果
pub trait EchoedResult {
    /// 回传的位置；缺失时返回 None
    fn echoed_index(&self) -> Option<usize>;

    /// 回传的提示词；缺失时返回 None
    fn echoed_prompt(&self) -> Option<&str>;
}

/// 实际使用的匹配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Index,
    PromptText,
}

/// 匹配结果，`ordered[i]` 对应第 i 个提交项
#[derive(Debug)]
pub struct Matched<R> {
    pub strategy: MatchStrategy,
    pub ordered: Vec<R>,
}

/// 将结果与提交的提示词对齐
///
/// # 参数
/// - `results`: 提供方返回的结果（任意顺序）
/// - `prompts`: 提交时的提示词，顺序即提交顺序
pub fn match_results<R: EchoedResult + Clone>(
    results: Vec<R>,
    prompts: &[String],
) -> AppResult<Matched<R>> {
    if let Some(ordered) = try_index_match(&results, prompts.len()) {
        debug!("✓ 使用位置匹配 {} 条结果", prompts.len());
        let mut slots: Vec<Option<R>> = results.into_iter().map(Some).collect();
        let ordered = ordered
            .into_iter()
            .map(|pos| slots[pos].take())
            .collect::<Option<Vec<R>>>()
            .ok_or_else(|| AppError::matching("位置映射内部不一致"))?;
        return Ok(Matched {
            strategy: MatchStrategy::Index,
            ordered,
        });
    }

    info!("🔍 位置信息不可用，改为按提示词匹配");
    let ordered = prompt_match(results, prompts)?;
    Ok(Matched {
        strategy: MatchStrategy::PromptText,
        ordered,
    })
}

/// 返回每个提交位置对应的结果下标；位置不完整、重复或越界时返回 None
fn try_index_match<R: EchoedResult>(results: &[R], expected: usize) -> Option<Vec<usize>> {
    let mut by_index: HashMap<usize, usize> = HashMap::with_capacity(results.len());

    for (pos, result) in results.iter().enumerate() {
        let index = match result.echoed_index() {
            Some(i) if (1..=expected).contains(&i) => i,
            other => {
                warn!(
                    "⚠️ 结果 {} 的位置无效: {:?} (期望 1-{})",
                    pos, other, expected
                );
                return None;
            }
        };
        if by_index.insert(index, pos).is_some() {
            warn!("⚠️ 结果位置重复: {}", index);
            return None;
        }
    }

    if by_index.len() != expected {
        warn!(
            "⚠️ 期望 {} 条结果，实际有效位置 {} 个",
            expected,
            by_index.len()
        );
        return None;
    }

    (1..=expected).map(|i| by_index.get(&i).copied()).collect()
}

fn prompt_match<R: EchoedResult + Clone>(results: Vec<R>, prompts: &[String]) -> AppResult<Vec<R>> {
    let mut by_prompt: HashMap<String, R> = HashMap::with_capacity(results.len());
    for result in results {
        if let Some(prompt) = result.echoed_prompt().filter(|p| !p.is_empty()) {
            by_prompt.insert(prompt.to_string(), result.clone());
        }
    }
    debug!("按提示词建立了 {} 条映射", by_prompt.len());

    prompts
        .iter()
        .map(|prompt| {
            by_prompt
                .get(prompt)
                .cloned()
                .ok_or_else(|| AppError::matching(format!("找不到问题对应的结果: {:?}", prompt)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Echo {
        index: Option<usize>,
        prompt: Option<String>,
        answer: String,
    }

    impl EchoedResult for Echo {
        fn echoed_index(&self) -> Option<usize> {
            self.index
        }

        fn echoed_prompt(&self) -> Option<&str> {
            self.prompt.as_deref()
        }
    }

    fn echo(index: usize, prompt: &str) -> Echo {
        Echo {
            index: Some(index),
            prompt: Some(prompt.to_string()),
            answer: format!("answer to {}", prompt),
        }
    }

    fn prompts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("q{}", i)).collect()
    }

    #[test]
    fn test_index_match_restores_permutation() {
        let prompts = prompts(5);
        let results = vec![
            echo(3, "q3"),
            echo(1, "q1"),
            echo(5, "q5"),
            echo(2, "q2"),
            echo(4, "q4"),
        ];

        let matched = match_results(results, &prompts).unwrap();
        assert_eq!(matched.strategy, MatchStrategy::Index);
        let answers: Vec<_> = matched.ordered.iter().map(|r| r.answer.as_str()).collect();
        assert_eq!(
            answers,
            vec!["answer to q1", "answer to q2", "answer to q3", "answer to q4", "answer to q5"]
        );
    }

    #[test]
    fn test_sentinel_indices_fall_back_to_prompt_text() {
        let prompts = prompts(3);
        let results: Vec<Echo> = ["q2", "q3", "q1"]
            .iter()
            .map(|p| Echo {
                index: Some(0),
                prompt: Some(p.to_string()),
                answer: format!("answer to {}", p),
            })
            .collect();

        let matched = match_results(results, &prompts).unwrap();
        assert_eq!(matched.strategy, MatchStrategy::PromptText);
        assert_eq!(matched.ordered[0].answer, "answer to q1");
        assert_eq!(matched.ordered[2].answer, "answer to q3");
    }

    #[test]
    fn test_duplicate_index_falls_back_wholesale() {
        let prompts = prompts(3);
        // 位置 2 重复：不能部分信任位置映射
        let results = vec![echo(1, "q1"), echo(2, "q3"), echo(2, "q2")];

        let matched = match_results(results, &prompts).unwrap();
        assert_eq!(matched.strategy, MatchStrategy::PromptText);
        assert_eq!(matched.ordered[1].answer, "answer to q2");
        assert_eq!(matched.ordered[2].answer, "answer to q3");
    }

    #[test]
    fn test_missing_result_falls_back_then_fails() {
        let prompts = prompts(3);
        let results = vec![echo(1, "q1"), echo(3, "q3")];

        let err = match_results(results, &prompts).unwrap_err();
        assert!(err.to_string().contains("q2"));
    }

    #[test]
    fn test_out_of_range_index_uses_prompt_text() {
        let prompts = prompts(2);
        let results = vec![echo(1, "q1"), echo(7, "q2")];

        let matched = match_results(results, &prompts).unwrap();
        assert_eq!(matched.strategy, MatchStrategy::PromptText);
        assert_eq!(matched.ordered[1].answer, "answer to q2");
    }
}
