//! 条目处理上下文
//!
//! 封装"我正在处理第几个条目、它的 ID 是什么"这一信息

use std::fmt::Display;

/// 条目处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 条目 ID
    pub item_id: String,

    /// 在本次工作列表中的位置（从1开始，仅用于日志显示）
    pub position: usize,

    /// 本次工作列表的总数
    pub total: usize,
}

impl ItemCtx {
    /// 创建新的条目上下文
    pub fn new(item_id: impl Into<String>, position: usize, total: usize) -> Self {
        Self {
            item_id: item_id.into(),
            position,
            total,
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[条目 {} {}/{}]", self.item_id, self.position, self.total)
    }
}
