//! 费用计算服务

use tracing::debug;

use crate::config::{CostTable, TokenPrice};

/// 费用计算服务
///
/// 计费表在构造时注入
#[derive(Debug, Clone)]
pub struct CostService {
    table: CostTable,
}

impl CostService {
    pub fn new(table: CostTable) -> Self {
        Self { table }
    }

    /// 模型的 token 单价；未知模型按回退模型计价
    pub fn price_for(&self, model: &str) -> TokenPrice {
        if let Some(price) = self.table.models.get(model) {
            return *price;
        }
        debug!("模型 {} 不在计费表中，按 {} 计价", model, self.table.fallback_model);
        self.table
            .models
            .get(&self.table.fallback_model)
            .copied()
            .unwrap_or(TokenPrice {
                input_per_million: 0.0,
                output_per_million: 0.0,
            })
    }

    /// 按 token 计算单次调用费用
    ///
    /// # 参数
    /// - `family`: 提供方家族（用于联网搜索计价）
    /// - `model`: 模型名
    /// - `input_tokens` / `output_tokens`: token 数
    /// - `websearch`: 是否使用了联网搜索
    pub fn token_cost(
        &self,
        family: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        websearch: bool,
    ) -> f64 {
        let price = self.price_for(model);
        let mut cost = input_tokens as f64 / 1_000_000.0 * price.input_per_million
            + output_tokens as f64 / 1_000_000.0 * price.output_per_million;
        if websearch {
            cost += self.websearch_cost(family);
        }
        cost
    }

    /// 单次联网搜索的费用
    pub fn websearch_cost(&self, family: &str) -> f64 {
        self.table
            .websearch_per_thousand
            .get(family)
            .map(|per_thousand| per_thousand / 1000.0)
            .unwrap_or(0.0)
    }

    /// 任务型提供方按条计费
    pub fn job_flat_cost(&self) -> f64 {
        self.table.job_flat_per_call
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CostService {
        CostService::new(CostTable::default())
    }

    #[test]
    fn test_token_cost() {
        let cost = service().token_cost("openai", "gpt-4.1", 1_000_000, 500_000, false);
        assert!((cost - (3.0 + 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_fallback_price() {
        let s = service();
        assert_eq!(s.price_for("gpt-9-ultra"), s.price_for("gpt-4.1"));
    }

    #[test]
    fn test_websearch_surcharge() {
        let s = service();
        let plain = s.token_cost("openai", "gpt-5", 1000, 1000, false);
        let searched = s.token_cost("openai", "gpt-5", 1000, 1000, true);
        assert!((searched - plain - 0.035).abs() < 1e-9);
        assert_eq!(s.websearch_cost("unknown"), 0.0);
    }
}
