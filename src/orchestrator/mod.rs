//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责并发调度和用例编排，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `dispatcher` - 并发调度器
//! - 控制同时进行的转换调用数量（Semaphore）
//! - 频率限制时指数退避重试
//! - 按提交顺序返回结果，任一任务失败时快速失败
//!
//! ### `reducer` - 层级合并器
//! - 单次处理 / 分组整理 + 合并
//! - 合并输入过大时逐层递归，深度有上限
//!
//! ### `summarize` - 批量摘要
//! - 每个视频一次转换，结果追加到同一份文档
//! - 进度逐条落盘，单条失败不影响其他条目
//!
//! ### `consolidate` - 分类整理
//! - 每个分类文件一次归约
//! - 任一文件失败即中止
//!
//! ## 层次关系
//!
//! ```text
//! summarize / consolidate (处理一批条目)
//!     ↓
//! workflow::SummaryFlow / reducer (处理单个条目)
//!     ↓
//! dispatcher (并发 + 重试)
//!     ↓
//! services (能力层：transform / batcher / prompt / writer)
//!     ↓
//! infrastructure (基础设施：ProgressStore)
//! ```

pub mod consolidate;
pub mod dispatcher;
pub mod reducer;
pub mod summarize;

// 重新导出主要类型
pub use consolidate::{run_consolidate, ConsolidateOptions, ConsolidateReport};
pub use dispatcher::{Dispatcher, RetryPolicy};
pub use reducer::{HierarchicalReducer, ReducePlan, ReduceReport, Strategy};
pub use summarize::{run_summarize, SummarizeOptions, SummarizeReport};
