//! 单元拆分
//!
//! 按分隔符把语料拆成有序的原子单元。拆分不会失败：分隔符不出现时整段文本就是一个单元。

use regex::Regex;

use crate::models::Unit;
use crate::services::token_estimator::TokenEstimator;

/// 摘要文件中条目之间的分隔（单独一行的 `---`）
pub const SUMMARY_SEPARATOR: &str = r"\n---\n";
/// 分类合并文件中来源之间的分隔（单独一行的 36 个 `-`）
pub const CATEGORY_SEPARATOR: &str = r"\n-{36}\n";
/// 分类文件中来源段落的起始标记
pub const SOURCE_MARKER: &str = "## Source:";

/// 单元拆分器
#[derive(Debug, Clone)]
pub struct UnitSplitter {
    separator: Regex,
    /// 标题与正文粘在同一段时，正文从该标记开始
    body_marker: Option<String>,
    estimator: TokenEstimator,
}

impl UnitSplitter {
    pub fn new(separator: Regex, estimator: TokenEstimator) -> Self {
        Self {
            separator,
            body_marker: None,
            estimator,
        }
    }

    pub fn with_body_marker(mut self, marker: impl Into<String>) -> Self {
        self.body_marker = Some(marker.into());
        self
    }

    /// 摘要文件拆分器
    pub fn summaries(estimator: TokenEstimator) -> Self {
        Self::new(compile(SUMMARY_SEPARATOR), estimator)
    }

    /// 分类合并文件拆分器
    pub fn category_file(estimator: TokenEstimator) -> Self {
        Self::new(compile(CATEGORY_SEPARATOR), estimator).with_body_marker(SOURCE_MARKER)
    }

    /// 拆分文本
    ///
    /// 丢弃空白段和只有标题行的段，其余内容按原顺序逐段保留。
    pub fn split(&self, text: &str) -> Vec<Unit> {
        self.separator
            .split(text)
            .filter_map(|part| self.clean_segment(part))
            .map(|segment| self.estimator.unit(segment))
            .collect()
    }

    fn clean_segment<'a>(&self, part: &'a str) -> Option<&'a str> {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        if is_header(part) && !part.contains('\n') {
            return None;
        }
        if let Some(marker) = &self.body_marker {
            if is_header(part) {
                if let Some(idx) = part.find(marker.as_str()) {
                    return Some(&part[idx..]);
                }
            }
        }
        Some(part)
    }
}

fn is_header(part: &str) -> bool {
    part.starts_with("# ")
}

fn compile(pattern: &str) -> Regex {
    // 内置常量，测试覆盖
    Regex::new(pattern).unwrap_or_else(|e| panic!("内置分隔符无效 {pattern}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_splitter() -> UnitSplitter {
        UnitSplitter::category_file(TokenEstimator::default())
    }

    #[test]
    fn test_no_separator_yields_single_unit() {
        let units = UnitSplitter::summaries(TokenEstimator::default()).split("just one item\nwith two lines");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text(), "just one item\nwith two lines");
    }

    #[test]
    fn test_empty_and_whitespace_corpus_yields_nothing() {
        let splitter = UnitSplitter::summaries(TokenEstimator::default());
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("  \n---\n \n---\n").is_empty());
    }

    #[test]
    fn test_category_header_is_dropped_and_order_kept() {
        let rule = "-".repeat(36);
        let text = format!(
            "# Salary\n\n{rule}\n\n## Source: a\n\nfirst\n\n{rule}\n\n## Source: b\n\nsecond\n"
        );
        let units = category_splitter().split(&text);
        let texts: Vec<&str> = units.iter().map(Unit::text).collect();
        assert_eq!(texts, vec!["## Source: a\n\nfirst", "## Source: b\n\nsecond"]);
    }

    #[test]
    fn test_header_glued_to_first_source_keeps_body() {
        let rule = "-".repeat(36);
        let text = format!("# Salary\n## Source: a\n\nfirst\n{rule}\n## Source: b\nsecond");
        let units = category_splitter().split(&text);
        assert_eq!(units[0].text(), "## Source: a\n\nfirst");
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_summary_split_is_lossless_for_content() {
        let items = ["# A\nbody a", "# B\nbody b", "# C\nbody c"];
        let text = items.join("\n---\n");
        let units = UnitSplitter::summaries(TokenEstimator::default()).split(&text);
        let rebuilt: Vec<&str> = units.iter().map(Unit::text).collect();
        assert_eq!(rebuilt, items);
    }

    #[test]
    fn test_short_dash_rule_is_not_a_category_separator() {
        let text = "## Source: a\nx\n---\ny";
        assert_eq!(category_splitter().split(text).len(), 1);
    }
}
