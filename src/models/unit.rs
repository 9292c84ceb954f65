//! 流水线数据模型
//!
//! `Unit` → `Batch` → `Job` → `JobResult` → `MergeSection`

use std::fmt::{self, Display};

/// 批次内各单元之间的分隔符
pub const UNIT_JOINER: &str = "\n\n---\n\n";

/// 原子文本单元
///
/// 不可再拆分的文本块，创建后文本与估算大小都不再变化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    text: String,
    tokens: usize,
}

impl Unit {
    /// 创建文本单元，`tokens` 为估算大小
    pub fn new(text: impl Into<String>, tokens: usize) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }
}

/// 一次转换调用所包含的单元
///
/// 非空，单元顺序与输入顺序一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 批次序号（从 0 开始）
    pub index: usize,
    pub units: Vec<Unit>,
}

impl Batch {
    pub fn new(index: usize, units: Vec<Unit>) -> Self {
        debug_assert!(!units.is_empty(), "批次不能为空");
        Self { index, units }
    }

    /// 批次内估算 token 总数
    pub fn tokens(&self) -> usize {
        self.units.iter().map(Unit::tokens).sum()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// 拼接为发送给转换服务的文本
    pub fn joined_text(&self) -> String {
        self.units
            .iter()
            .map(Unit::text)
            .collect::<Vec<_>>()
            .join(UNIT_JOINER)
    }
}

/// 待调度的转换任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// 提交顺序，用于在并发完成后恢复顺序
    pub index: usize,
    /// 日志和错误信息中使用的名称
    pub label: String,
    pub prompt: String,
    pub input: String,
}

impl Job {
    pub fn new(
        index: usize,
        label: impl Into<String>,
        prompt: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            index,
            label: label.into(),
            prompt: prompt.into(),
            input: input.into(),
        }
    }
}

/// 转换任务结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// 对应 `Job::index`
    pub index: usize,
    pub output: String,
}

/// 层级合并时带编号的段落
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSection {
    pub index: usize,
    pub text: String,
}

impl MergeSection {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// 把一组结果按顺序编号为段落
    pub fn from_outputs(outputs: impl IntoIterator<Item = String>) -> Vec<Self> {
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, text)| Self::new(index, text))
            .collect()
    }

    /// 拼接为合并调用的输入
    pub fn render_all(sections: &[MergeSection]) -> String {
        sections
            .iter()
            .map(MergeSection::to_string)
            .collect::<Vec<_>>()
            .join(UNIT_JOINER)
    }
}

impl Display for MergeSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "## Section {}\n\n{}", self.index + 1, self.text)
    }
}
