//! 提示词模板
//!
//! 模板中的 `{name}` 为占位符，只做字符串替换，不支持任何控制结构。
//! 构造时校验占位符都在允许列表内，渲染时校验参数齐全且都已声明。

use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::TemplateError;

/// 分组整理提示词，参数：`category`
pub const CONSOLIDATE_PROMPT: &str = "\
You are given summaries from multiple YouTube videos about: {category}

These summaries contain bulleted/numbered advice, tactics, and insights from different creators.
There is significant overlap: many videos cover the same advice in different words.

Your task:
1. Consolidate into a single, well-organized reference document.
2. REMOVE redundant advice that appears across multiple videos. If 5 videos all say
   \"research the company before your interview,\" that becomes ONE bullet, not five.
3. PRESERVE every unique insight, specific script/phrase, concrete example, or distinctive
   perspective, even if only one video mentions it.
4. When creators give CONFLICTING advice, note the disagreement briefly
   (e.g., \"Some advise X while others recommend Y because Z\").
5. Organize by sub-topic with clear headers.
6. Use concise bullet points. No fluff, no preamble, no meta-commentary.

Output ONLY the consolidated reference document in markdown.";

/// 段落合并提示词，参数：`n`、`category`
pub const MERGE_PROMPT: &str = "\
You are given {n} separately consolidated reference sections about: {category}

These sections were produced independently and contain some overlap with each other.

Your task:
1. Merge into a single, final reference document.
2. Remove any remaining redundancies across sections.
3. Preserve all unique content.
4. Organize logically with clear sub-topic headers.
5. Use concise bullet points. No fluff, no preamble, no meta-commentary.

Output ONLY the final consolidated reference document in markdown.";

/// 默认摘要提示词（无占位符）
pub const DEFAULT_SUMMARY_PROMPT: &str = "\
Summarize the following video transcript concisely. \
Focus on the key points, actionable advice, and main takeaways. \
Use bullet points where appropriate. Keep the summary to 1-2 paragraphs.";

/// 摘要模板可以使用的参数
pub const SUMMARY_PARAMS: &[&str] = &["bullet_count", "title"];

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z_][a-z0-9_]*)\}").unwrap_or_else(|e| panic!("占位符正则无效: {e}"))
    })
}

/// 渲染参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptParams(BTreeMap<String, String>);

impl PromptParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(name.into(), value.to_string());
        self
    }
}

/// 校验过的提示词模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    allowed: BTreeSet<String>,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    /// 创建模板；出现 `allowed` 之外的占位符时报错
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        allowed: &[&str],
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        let text = text.into();
        let allowed: BTreeSet<String> = allowed.iter().map(|s| s.to_string()).collect();

        let placeholders: BTreeSet<String> = placeholder_pattern()
            .captures_iter(&text)
            .map(|c| c[1].to_string())
            .collect();

        if let Some(unknown) = placeholders.iter().find(|p| !allowed.contains(*p)) {
            return Err(TemplateError::UnknownPlaceholder {
                template: name,
                placeholder: unknown.clone(),
            });
        }

        Ok(Self {
            name,
            text,
            allowed,
            placeholders,
        })
    }

    /// 分组整理模板
    pub fn consolidate() -> Result<Self, TemplateError> {
        Self::new("consolidate", CONSOLIDATE_PROMPT, &["category"])
    }

    /// 段落合并模板
    pub fn merge() -> Result<Self, TemplateError> {
        Self::new("merge", MERGE_PROMPT, &["n", "category"])
    }

    /// 摘要模板（可以只使用部分参数，也可以不使用）
    pub fn summary(text: impl Into<String>) -> Result<Self, TemplateError> {
        Self::new("summary", text, SUMMARY_PARAMS)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// 渲染：对原文一次性替换，参数值中的 `{...}` 保持原样
    pub fn render(&self, params: &PromptParams) -> Result<String, TemplateError> {
        if let Some(name) = params.0.keys().find(|k| !self.allowed.contains(*k)) {
            return Err(TemplateError::UnknownParameter {
                template: self.name.clone(),
                name: name.clone(),
            });
        }
        if let Some(missing) = self.placeholders.iter().find(|p| !params.0.contains_key(*p)) {
            return Err(TemplateError::MissingParameter {
                template: self.name.clone(),
                placeholder: missing.clone(),
            });
        }

        let rendered = placeholder_pattern().replace_all(&self.text, |caps: &Captures<'_>| {
            params.0.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// 根据视频时长计算要点数量：大约每 90 秒一条，最少 10 条
pub fn compute_bullet_count(duration_seconds: Option<u64>) -> u64 {
    let duration = duration_seconds.unwrap_or(600);
    duration.div_ceil(90).max(10)
}
