use crate::error::{AppError, AppResult, ConfigError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置
///
/// 只在入口处构造一次，然后以引用形式传给各组件。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时进行的转换调用数量
    pub max_concurrency: usize,
    /// 每个分组的 token 预算
    pub chunk_tokens: usize,
    /// 不分组、一次处理的 token 上限
    pub single_pass_threshold: usize,
    /// 最终合并允许的输入大小 = single_pass_threshold × 该倍数
    pub merge_threshold_factor: usize,
    /// 字符数 / token 的估算比例
    pub chars_per_token: usize,
    /// 合并调用的最大输出 tokens
    pub max_output_tokens: u32,
    /// 摘要调用的最大输出 tokens
    pub summary_max_tokens: u32,
    /// 递归合并最大深度
    pub max_merge_depth: usize,
    /// 单个任务最多尝试次数
    pub retry_attempts: u32,
    /// 首次退避等待（秒），之后每次翻倍
    pub retry_base_delay_secs: u64,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            chunk_tokens: 20_000,
            single_pass_threshold: 30_000,
            merge_threshold_factor: 2,
            chars_per_token: 4,
            max_output_tokens: 32_768,
            summary_max_tokens: 2048,
            max_merge_depth: 4,
            retry_attempts: 5,
            retry_base_delay_secs: 10,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            temperature: 0.3,
        }
    }
}

impl Config {
    /// 从 TOML 文件加载，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::file(path, e))?;
        toml::from_str(&content).map_err(|e| {
            ConfigError::invalid(path.display().to_string(), e.to_string()).into()
        })
    }

    /// 用环境变量覆盖当前配置
    pub fn with_env(self) -> AppResult<Self> {
        Ok(Self {
            max_concurrency: env_parse("MAX_CONCURRENCY", self.max_concurrency)?,
            chunk_tokens: env_parse("CHUNK_TOKENS", self.chunk_tokens)?,
            single_pass_threshold: env_parse("SINGLE_PASS_THRESHOLD", self.single_pass_threshold)?,
            merge_threshold_factor: env_parse("MERGE_THRESHOLD_FACTOR", self.merge_threshold_factor)?,
            chars_per_token: env_parse("CHARS_PER_TOKEN", self.chars_per_token)?,
            max_output_tokens: env_parse("MAX_OUTPUT_TOKENS", self.max_output_tokens)?,
            summary_max_tokens: env_parse("SUMMARY_MAX_TOKENS", self.summary_max_tokens)?,
            max_merge_depth: env_parse("MAX_MERGE_DEPTH", self.max_merge_depth)?,
            retry_attempts: env_parse("RETRY_ATTEMPTS", self.retry_attempts)?,
            retry_base_delay_secs: env_parse("RETRY_BASE_DELAY_SECS", self.retry_base_delay_secs)?,
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            temperature: env_parse("LLM_TEMPERATURE", self.temperature)?,
        })
    }

    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env()
    }

    /// 最终合并允许的输入大小
    pub fn merge_threshold(&self) -> usize {
        self.single_pass_threshold * self.merge_threshold_factor
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_concurrency", self.max_concurrency),
            ("chunk_tokens", self.chunk_tokens),
            ("single_pass_threshold", self.single_pass_threshold),
            ("merge_threshold_factor", self.merge_threshold_factor),
            ("chars_per_token", self.chars_per_token),
            ("retry_attempts", self.retry_attempts as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(field, "必须大于 0"));
            }
        }
        if self.max_output_tokens == 0 || self.summary_max_tokens == 0 {
            return Err(ConfigError::invalid("max_output_tokens", "必须大于 0"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value,
            expected_type: std::any::type_name::<T>().to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("chunk_tokens = 15000\nmax_concurrency = 2\n").unwrap();
        assert_eq!(config.chunk_tokens, 15_000);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.single_pass_threshold, 30_000);
        assert_eq!(config.merge_threshold(), 60_000);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrency: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
        assert!(Config::default().validate().is_ok());
    }
}
