use serde::{Deserialize, Serialize};

/// 问题
///
/// 由外部题库提供，执行期间不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// 题库中的唯一标识
    pub id: String,
    /// 发送给模型的问题文本
    pub text: String,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}
