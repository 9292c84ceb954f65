//! token 估算
//!
//! 按字符数除以固定比例估算，只是近似值，但对同一文本结果稳定。

use crate::config::Config;
use crate::models::Unit;

/// 字符数 → token 估算器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chars_per_token)
    }

    /// 估算文本的 token 数
    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }

    /// 创建带估算大小的单元
    pub fn unit(&self, text: impl Into<String>) -> Unit {
        let text = text.into();
        let tokens = self.estimate(&text);
        Unit::new(text, tokens)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}
