//! # Transcript Digest
//!
//! 把大量视频转录文本压缩为摘要文档，再按分类整理为参考资料
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有进度文件，只暴露状态读写能力
//! - `ProgressStore` - 唯一的进度文件 owner，每次状态变化立即落盘
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `Transform` / `OpenAiTransform` - 文本转换能力
//! - `UnitSplitter` / `BalancedBatcher` - 拆分与均衡分组
//! - `PromptTemplate` - 校验过的提示词模板
//! - `DocumentWriter` - 串行追加共享文档
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个视频"的完整摘要流程
//! - `ItemCtx` - 上下文封装（条目 ID + 位置）
//! - `SummaryFlow` - 读取 → 渲染提示词 → 转换 → 追加
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/dispatcher` - 并发上限、退避重试、顺序还原
//! - `orchestrator/reducer` - 分组整理与层级合并
//! - `orchestrator/summarize` - 批量摘要（逐条隔离失败）
//! - `orchestrator/consolidate` - 分类整理（失败即中止）
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, TransformError};
pub use infrastructure::{ProgressStore, StatusCounts};
pub use models::{Batch, ItemStatus, Job, JobResult, ProgressRecord, Unit};
pub use orchestrator::{
    run_consolidate, run_summarize, ConsolidateOptions, Dispatcher, HierarchicalReducer,
    RetryPolicy, SummarizeOptions,
};
pub use services::{BalancedBatcher, OpenAiTransform, Transform, UnitSplitter};
pub use workflow::{ItemCtx, SummaryFlow};
