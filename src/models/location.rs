//! 地区与 (模型, 地区) 组合
//!
//! 一次提供方调用只携带一个模型和一个地区，因此 `ModelLocationPair` 是分批的最小单位。

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 任务型提供方支持的国家代码
const JOB_SUPPORTED_COUNTRIES: [&str; 14] = [
    "US", "CA", "GB", "AU", "DE", "FR", "IT", "ES", "NL", "JP", "KR", "IN", "BR", "MX",
];

/// 地区
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// 国家代码（ISO 3166-1 alpha-2）
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Location {
    pub fn country(code: impl Into<String>) -> Self {
        Self {
            country: code.into(),
            region: None,
            city: None,
        }
    }

    /// 规范化：国家代码去空白并大写，空值视为 US，UK 映射为 GB；
    /// 空白的城市和省州视为缺省
    pub fn normalized(&self) -> Self {
        let mut code = self.country.trim().to_uppercase();
        if code.is_empty() {
            code = "US".to_string();
        }
        if code == "UK" {
            code = "GB".to_string();
        }
        Self {
            country: code,
            region: clean_optional(&self.region),
            city: clean_optional(&self.city),
        }
    }

    /// 映射为任务型提供方接受的国家代码，不支持的国家回退到 US
    pub fn job_country_code(&self) -> String {
        let code = self.normalized().country;
        if JOB_SUPPORTED_COUNTRIES.contains(&code.as_str()) {
            code
        } else {
            "US".to_string()
        }
    }

    /// 用于提示词的地区描述，如 "Austin, Texas, United States"
    pub fn prompt_label(&self) -> String {
        let n = self.normalized();
        let mut parts: Vec<String> = Vec::new();
        if let Some(city) = n.city {
            parts.push(city);
        }
        if let Some(region) = n.region {
            parts.push(region);
        }
        parts.push(country_name(&n.country).unwrap_or(&n.country).to_string());
        parts.join(", ")
    }
}

fn clean_optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 国家代码 → 国家英文名
pub fn country_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "US" => "United States",
        "CA" => "Canada",
        "GB" => "United Kingdom",
        "IE" => "Ireland",
        "AU" => "Australia",
        "NZ" => "New Zealand",
        "DE" => "Germany",
        "FR" => "France",
        "ES" => "Spain",
        "PT" => "Portugal",
        "IT" => "Italy",
        "NL" => "Netherlands",
        "BE" => "Belgium",
        "CH" => "Switzerland",
        "AT" => "Austria",
        "SE" => "Sweden",
        "NO" => "Norway",
        "DK" => "Denmark",
        "FI" => "Finland",
        "PL" => "Poland",
        "JP" => "Japan",
        "KR" => "South Korea",
        "CN" => "China",
        "IN" => "India",
        "SG" => "Singapore",
        "BR" => "Brazil",
        "MX" => "Mexico",
        "AR" => "Argentina",
        "ZA" => "South Africa",
        "AE" => "United Arab Emirates",
        _ => return None,
    };
    Some(name)
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = self.normalized();
        write!(f, "{}", n.country)?;
        if let Some(region) = &n.region {
            write!(f, "/{}", region)?;
        }
        if let Some(city) = &n.city {
            write!(f, "/{}", city)?;
        }
        Ok(())
    }
}

/// (模型, 地区) 组合
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelLocationPair {
    pub model: String,
    pub location: Location,
}

impl ModelLocationPair {
    pub fn new(model: impl Into<String>, location: Location) -> Self {
        Self {
            model: model.into(),
            location: location.normalized(),
        }
    }
}

impl Display for ModelLocationPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.model, self.location)
    }
}
