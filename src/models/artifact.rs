use serde::{Deserialize, Serialize};

/// 下游抽取产物的种类
///
/// 一条执行记录在三种产物都存在时才算处理完毕
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Evaluation,
    Citations,
    Competitors,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Evaluation,
        ArtifactKind::Citations,
        ArtifactKind::Competitors,
    ];
}
