//! 进度记录
//!
//! 每个外部条目（视频 ID、分类文件名）一条记录，由 `ProgressStore` 独占持有。

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// 条目处理状态
///
/// 允许的转换：
/// - `Pending → InProgress | Done | Failed`
/// - `InProgress → Done | Failed`
///
/// `Done`、`Failed` 为终态。`InProgress → Pending`（中断恢复）与
/// `Failed → Pending`（人工重试）只能通过 `ProgressStore` 的专门操作完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ItemStatus {
    /// 常规流程中是否允许转换到 `next`
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Done) | (Pending, Failed)
                | (InProgress, Done) | (InProgress, Failed)
        )
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 单个条目的进度记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    /// 时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// 输入文件（转录文本或分类文件）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 输出位置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// 处理方式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ProgressRecord {
    /// 创建待处理记录
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Pending,
            title: None,
            url: None,
            upload_date: None,
            duration: None,
            source: None,
            output: None,
            method: None,
            error: None,
            updated_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 标题，缺省时使用 ID
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

/// 状态转换时附带写入的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionMeta {
    pub output: Option<String>,
    pub method: Option<String>,
    pub error: Option<String>,
}

impl TransitionMeta {
    pub fn done(output: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            method: Some(method.into()),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }
}
