//! 分类整理 - 编排层
//!
//! ## 职责
//!
//! 本模块按文件逐个整理分类摘要，是分类级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **收集文件**：单个 `.md` 文件或目录下的全部 `.md`（按文件名排序）
//! 2. **拆分归约**：拆分为单元后交给 `HierarchicalReducer`
//! 3. **断点续跑**：输出目录中的 `consolidate.progress.json` 记录每个文件的状态
//! 4. **写入结果**：带统计信息的标题 + 归约结果
//! 5. **dry-run**：只输出计划，不调用转换服务，也不读写进度
//!
//! 任一文件失败都会记录为 `failed` 并中止整个运行。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::ProgressStore;
use crate::models::{ItemStatus, ProgressRecord, TransitionMeta};
use crate::orchestrator::dispatcher::Dispatcher;
use crate::orchestrator::reducer::{HierarchicalReducer, ReduceReport, Strategy};
use crate::services::{TokenEstimator, Transform, UnitSplitter};
use crate::utils::logging::{format_thousands, log_category_start, print_final_stats};

/// 进度文件名（位于输出目录）
pub const CONSOLIDATE_PROGRESS_FILE: &str = "consolidate.progress.json";

/// 默认输出目录名
pub const DEFAULT_OUTPUT_DIR: &str = "_consolidated";

/// 整理运行参数
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// 单个 `.md` 文件或目录
    pub input: PathBuf,
    /// 输出目录，默认与输入目录同级的 `_consolidated`
    pub output_dir: Option<PathBuf>,
    pub dry_run: bool,
    /// 运行前把 `failed` 文件重置为 `pending`
    pub retry_failed: bool,
    /// 输出文件已存在时跳过
    pub skip_existing: bool,
}

/// 整理运行结果
#[derive(Debug, Clone, Default)]
pub struct ConsolidateReport {
    /// 本次写入的文件
    pub written: Vec<PathBuf>,
    /// 已完成或已存在而跳过的数量
    pub skipped: usize,
    /// 没有内容的文件数量
    pub empty: usize,
    /// dry-run 时的预计调用次数
    pub planned_calls: usize,
    pub output_dir: PathBuf,
}

/// 运行分类整理
pub async fn run_consolidate<T: Transform>(
    transform: Arc<T>,
    config: &Config,
    options: &ConsolidateOptions,
) -> AppResult<ConsolidateReport> {
    let (files, default_output) = collect_files(&options.input).await?;
    let output_dir = options.output_dir.clone().unwrap_or(default_output);
    let mut report = ConsolidateReport {
        output_dir: output_dir.clone(),
        ..Default::default()
    };

    if files.is_empty() {
        warn!("⚠️ {} 下没有 .md 文件", options.input.display());
        return Ok(report);
    }
    info!(
        "将整理 {} 个文件 → {}/",
        files.len(),
        output_dir.display()
    );

    let estimator = TokenEstimator::from_config(config);
    let splitter = UnitSplitter::category_file(estimator);
    let reducer = HierarchicalReducer::new(Dispatcher::from_config(transform, config), config)?;

    if options.dry_run {
        for (idx, path) in files.iter().enumerate() {
            let label = category_label(path);
            log_category_start(idx + 1, files.len(), &label);
            let units = splitter.split(&read_text(path).await?);
            let plan = reducer.plan(units);
            info!(
                "{} 条摘要, ~{} tokens",
                plan.unit_count,
                format_thousands(plan.total_tokens)
            );
            for line in plan.describe() {
                info!("  {}", line);
            }
            report.planned_calls += plan.planned_calls();
        }
        info!("[DRY RUN] 共需调用 {} 次", report.planned_calls);
        return Ok(report);
    }

    let store = ProgressStore::load(output_dir.join(CONSOLIDATE_PROGRESS_FILE)).await?;
    store
        .merge_new(files.iter().map(|path| {
            ProgressRecord::pending(file_name(path))
                .with_title(category_label(path))
                .with_source(path.display().to_string())
        }))
        .await?;
    if options.retry_failed {
        store.reset_failed().await?;
    }
    store.recover_interrupted().await?;

    for (idx, path) in files.iter().enumerate() {
        let id = file_name(path);
        let label = category_label(path);
        let output_path = output_dir.join(&id);
        log_category_start(idx + 1, files.len(), &label);

        match store.get(&id).await.map(|r| r.status) {
            Some(ItemStatus::Done) => {
                info!("[条目 {}] 已完成，跳过", id);
                report.skipped += 1;
                continue;
            }
            Some(ItemStatus::Failed) => {
                warn!("[条目 {}] 上次失败，使用 --retry-failed 重新处理", id);
                report.skipped += 1;
                continue;
            }
            _ => {}
        }
        if options.skip_existing && fs::try_exists(&output_path).await.unwrap_or(false) {
            info!("[条目 {}] 输出已存在，跳过", id);
            report.skipped += 1;
            continue;
        }

        let units = splitter.split(&read_text(path).await?);
        if units.is_empty() {
            info!("[条目 {}] 没有摘要内容，跳过", id);
            report.empty += 1;
            continue;
        }

        store
            .transition(&id, ItemStatus::InProgress, TransitionMeta::default())
            .await?;

        let reduced = match reducer.reduce(&label, units).await {
            Ok(Some(reduced)) => reduced,
            Ok(None) => continue,
            Err(e) => {
                error!("[条目 {}] ❌ 整理失败: {}", id, e);
                store
                    .transition(&id, ItemStatus::Failed, TransitionMeta::failed(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        write_output(&output_path, &label, &reduced).await?;
        store
            .transition(
                &id,
                ItemStatus::Done,
                TransitionMeta::done(output_path.display().to_string(), method_of(&reduced)),
            )
            .await?;
        info!(
            "[条目 {}] ✓ ~{} → ~{} tokens ({:.0}%)，已写入 {}",
            id,
            format_thousands(reduced.input_tokens),
            format_thousands(reduced.output_tokens),
            reduced.ratio_percent(),
            output_path.display()
        );
        report.written.push(output_path);
    }

    print_final_stats(&store.counts().await, report.skipped);
    Ok(report)
}

/// 分类名：文件名去掉扩展名，下划线换成空格，每个单词首字母大写
pub fn category_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.split('_')
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// 输出文件的标题与统计行
pub fn output_header(label: &str, reduced: &ReduceReport) -> String {
    format!(
        "# {}\n\n*Consolidated from {} video summaries (~{} → ~{} tokens, {:.0}% of original)*\n\n",
        label,
        reduced.unit_count,
        format_thousands(reduced.input_tokens),
        format_thousands(reduced.output_tokens),
        reduced.ratio_percent()
    )
}

fn method_of(reduced: &ReduceReport) -> String {
    match reduced.strategy {
        Strategy::Chunked { .. } => format!("llm-consolidate-chunked-{}", reduced.calls),
        _ => "llm-consolidate-single".to_string(),
    }
}

async fn write_output(path: &Path, label: &str, reduced: &ReduceReport) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::file(parent, e))?;
    }
    let content = format!("{}{}", output_header(label, reduced), reduced.output);
    fs::write(path, content)
        .await
        .map_err(|e| AppError::file(path, e))
}

/// 收集待整理文件，并给出默认输出目录
async fn collect_files(input: &Path) -> AppResult<(Vec<PathBuf>, PathBuf)> {
    let metadata = fs::metadata(input)
        .await
        .map_err(|e| AppError::file(input, e))?;

    if metadata.is_file() {
        let base = input.parent().and_then(Path::parent).unwrap_or(Path::new(""));
        return Ok((vec![input.to_path_buf()], base.join(DEFAULT_OUTPUT_DIR)));
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(input)
        .await
        .map_err(|e| AppError::file(input, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::file(input, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "md") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let base = input.parent().unwrap_or(Path::new(""));
    Ok((files, base.join(DEFAULT_OUTPUT_DIR)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_text(path: &Path) -> AppResult<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_label_from_stem() {
        assert_eq!(
            category_label(Path::new("cats/salary_negotiation.md")),
            "Salary Negotiation"
        );
        assert_eq!(category_label(Path::new("RESUME_tips.md")), "Resume Tips");
    }

    #[test]
    fn test_output_header() {
        let reduced = ReduceReport {
            output: String::new(),
            strategy: Strategy::SinglePass,
            unit_count: 12,
            input_tokens: 47_000,
            output_tokens: 4_700,
            calls: 1,
            merge_depth: 0,
        };
        assert_eq!(
            output_header("Salary Negotiation", &reduced),
            "# Salary Negotiation\n\n*Consolidated from 12 video summaries (~47,000 → ~4,700 tokens, 10% of original)*\n\n"
        );
    }

    #[tokio::test]
    async fn test_directory_input_collects_sorted_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let input = dir.join("categories");
        std::fs::create_dir_all(&input).unwrap();
        for name in ["b.md", "a.md", "taxonomy.json"] {
            std::fs::write(input.join(name), "x").unwrap();
        }

        let (files, output) = collect_files(&input).await.unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
        assert_eq!(output, dir.join(DEFAULT_OUTPUT_DIR));
    }
}
