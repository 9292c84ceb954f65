//! 批量摘要 - 编排层
//!
//! ## 职责
//!
//! 1. **加载清单**：读取 `index.json`，把可摘要的视频并入进度存储
//! 2. **断点续跑**：已完成的条目不再处理，上次中断的条目重新排队
//! 3. **并发处理**：所有条目同时启动，由调度器的 Semaphore 限制调用数
//! 4. **失败隔离**：单个条目失败只记录为 `failed`，其余条目继续
//! 5. **致命错误**：输出被截断等配置问题中止整个运行
//!
//! 中止时调度器停止发出新调用，已拿到摘要的条目写完并标记 `done` 后才返回错误。
//! 没有拿到摘要的条目保持 `pending` / `in_progress`，下次运行会重新处理。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{ProgressStore, StatusCounts};
use crate::models::{load_video_index, ItemStatus, ProgressRecord, TransitionMeta};
use crate::orchestrator::dispatcher::Dispatcher;
use crate::services::prompt::DEFAULT_SUMMARY_PROMPT;
use crate::services::{DocumentWriter, PromptTemplate, Transform};
use crate::utils::logging::print_final_stats;
use crate::workflow::{ItemCtx, SummaryFlow};

/// 完成记录中的处理方式
pub const SUMMARY_METHOD: &str = "llm-summary";

/// 摘要运行参数
#[derive(Debug, Clone, Default)]
pub struct SummarizeOptions {
    /// 含 `index.json` 的目录
    pub input_dir: PathBuf,
    /// 输出文档，默认 `<input_dir>/summaries.md`
    pub output: Option<PathBuf>,
    /// 自定义提示词文件
    pub prompt_file: Option<PathBuf>,
    /// 运行前把 `failed` 条目重置为 `pending`
    pub retry_failed: bool,
}

impl SummarizeOptions {
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input_dir.join("summaries.md"))
    }
}

/// 摘要运行结果
#[derive(Debug, Clone, Default)]
pub struct SummarizeReport {
    /// 本次完成的数量
    pub processed: usize,
    /// 本次失败的数量
    pub failed: usize,
    /// 之前已完成、本次跳过的数量
    pub skipped: usize,
    /// 运行结束时进度存储中的统计
    pub counts: StatusCounts,
    pub output: PathBuf,
}

/// 条目处理结果
enum ItemOutcome {
    Done,
    Failed,
    /// 运行已中止，条目未处理
    Interrupted,
}

/// 进度文件与输出文档放在一起，例如 `summaries.md` → `summaries.progress.json`
pub fn progress_path_for(output: &Path) -> PathBuf {
    output.with_extension("progress.json")
}

/// 运行批量摘要
pub async fn run_summarize<T: Transform>(
    transform: Arc<T>,
    config: &Config,
    options: &SummarizeOptions,
) -> AppResult<SummarizeReport> {
    let index = load_video_index(&options.input_dir.join("index.json")).await?;
    let output = options.output_path();
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::file(parent, e))?;
    }

    let store = Arc::new(ProgressStore::load(progress_path_for(&output)).await?);
    let added = store
        .merge_new(index.eligible().map(|v| v.to_record()))
        .await?;
    if added > 0 {
        info!("📋 新增 {} 个待摘要条目", added);
    }
    if options.retry_failed {
        store.reset_failed().await?;
    }
    store.recover_interrupted().await?;

    let skipped = store.counts().await.done;
    let pending = newest_first(store.with_status(ItemStatus::Pending).await);
    let mut report = SummarizeReport {
        skipped,
        output: output.clone(),
        ..Default::default()
    };

    if pending.is_empty() {
        info!("✓ 没有待摘要的条目 (已完成 {})", skipped);
        report.counts = store.counts().await;
        return Ok(report);
    }
    if skipped > 0 {
        info!("断点续跑: {} 个已完成，{} 个待处理", skipped, pending.len());
    }

    let template = PromptTemplate::summary(load_prompt(options.prompt_file.as_deref()).await?)?;
    let writer = Arc::new(DocumentWriter::new(&output));
    let flow = Arc::new(SummaryFlow::new(
        Dispatcher::from_config(transform, config),
        template,
        &options.input_dir,
        writer,
    ));

    let total = pending.len();
    info!("开始摘要 {} 个条目 → {}", total, output.display());

    let mut tasks = JoinSet::new();
    for (idx, record) in pending.into_iter().enumerate() {
        let ctx = ItemCtx::new(&record.id, idx + 1, total);
        let store = store.clone();
        let flow = flow.clone();
        tasks.spawn(async move { process_item(&store, &flow, record, ctx).await });
    }

    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(ItemOutcome::Done) => report.processed += 1,
            Ok(ItemOutcome::Failed) => report.failed += 1,
            Ok(ItemOutcome::Interrupted) => {}
            Err(e) => {
                if fatal.is_none() {
                    error!("❌ 致命错误，等待进行中的条目写完后中止: {}", e);
                    flow.halt();
                    fatal = Some(e);
                } else {
                    warn!("中止期间的其他错误: {}", e);
                }
            }
        }
    }

    if let Some(e) = fatal {
        info!(
            "已中止，本次完成 {} 个条目，其余条目下次运行继续",
            report.processed
        );
        return Err(e);
    }

    report.counts = store.counts().await;
    print_final_stats(&report.counts, report.skipped);
    info!("摘要已写入: {}", output.display());
    Ok(report)
}

/// 单个条目：in_progress → 摘要 → done / failed
async fn process_item<T: Transform>(
    store: &ProgressStore,
    flow: &SummaryFlow<T>,
    record: ProgressRecord,
    ctx: ItemCtx,
) -> AppResult<ItemOutcome> {
    if flow.is_halted() {
        return Ok(ItemOutcome::Interrupted);
    }
    store
        .transition(&record.id, ItemStatus::InProgress, TransitionMeta::default())
        .await?;

    match flow.run(&record, &ctx).await {
        Ok(_) => {
            let output = flow.output_path().display().to_string();
            store
                .transition(
                    &record.id,
                    ItemStatus::Done,
                    TransitionMeta::done(output, SUMMARY_METHOD),
                )
                .await?;
            Ok(ItemOutcome::Done)
        }
        Err(e) if e.is_cancelled() => Ok(ItemOutcome::Interrupted),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("{} ⚠️ 处理失败: {}", ctx, e);
            store
                .transition(
                    &record.id,
                    ItemStatus::Failed,
                    TransitionMeta::failed(e.to_string()),
                )
                .await?;
            Ok(ItemOutcome::Failed)
        }
    }
}

/// 按上传日期从新到旧
fn newest_first(mut records: Vec<ProgressRecord>) -> Vec<ProgressRecord> {
    records.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
    records
}

async fn load_prompt(path: Option<&Path>) -> AppResult<String> {
    match path {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AppError::file(path, e))?;
            Ok(text.trim().to_string())
        }
        None => Ok(DEFAULT_SUMMARY_PROMPT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_file_sits_next_to_output() {
        assert_eq!(
            progress_path_for(Path::new("out/summaries.md")),
            PathBuf::from("out/summaries.progress.json")
        );
    }

    #[test]
    fn test_newest_first_ordering() {
        let mut a = ProgressRecord::pending("a");
        a.upload_date = Some("20230101".into());
        let mut b = ProgressRecord::pending("b");
        b.upload_date = Some("20240101".into());
        let c = ProgressRecord::pending("c");

        let ids: Vec<String> = newest_first(vec![a, c, b]).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_default_output_path() {
        let options = SummarizeOptions {
            input_dir: PathBuf::from("channel"),
            ..Default::default()
        };
        assert_eq!(options.output_path(), PathBuf::from("channel/summaries.md"));
    }
}
