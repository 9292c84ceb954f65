//! 单条摘要流程 - 流程层
//!
//! 核心职责：定义"一个视频"的完整摘要流程
//!
//! 流程顺序：
//! 1. 读取转录文件，去掉 YAML frontmatter
//! 2. 按视频时长渲染提示词
//! 3. 通过调度器发起一次转换（频率限制时退避重试）
//! 4. 把格式化后的段落追加到共享文档
//!
//! 状态转换（in_progress / done / failed）由编排层负责。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AppError, AppResult, ProgressError};
use crate::models::{Job, ProgressRecord};
use crate::orchestrator::dispatcher::Dispatcher;
use crate::services::prompt::compute_bullet_count;
use crate::services::{DocumentWriter, PromptParams, PromptTemplate, Transform};
use crate::utils::logging::truncate_text;
use crate::workflow::item_ctx::ItemCtx;

/// 单条摘要流程
///
/// - 不持有进度存储
/// - 共享文档通过 `DocumentWriter` 串行写入
pub struct SummaryFlow<T: Transform> {
    dispatcher: Dispatcher<T>,
    template: PromptTemplate,
    input_dir: PathBuf,
    writer: Arc<DocumentWriter>,
}

impl<T: Transform> SummaryFlow<T> {
    pub fn new(
        dispatcher: Dispatcher<T>,
        template: PromptTemplate,
        input_dir: impl Into<PathBuf>,
        writer: Arc<DocumentWriter>,
    ) -> Self {
        Self {
            dispatcher,
            template,
            input_dir: input_dir.into(),
            writer,
        }
    }

    pub fn output_path(&self) -> &Path {
        self.writer.path()
    }

    /// 中止运行：不再发出新调用，已返回的摘要照常写入
    pub fn halt(&self) {
        self.dispatcher.close();
    }

    pub fn is_halted(&self) -> bool {
        self.dispatcher.is_closed()
    }

    /// 处理单个条目，成功时返回摘要文本
    pub async fn run(&self, record: &ProgressRecord, ctx: &ItemCtx) -> AppResult<String> {
        let title = record.display_name();
        info!("{} 📝 {}", ctx, truncate_text(title, 60));

        let source = record
            .source
            .as_deref()
            .ok_or_else(|| ProgressError::MissingSource {
                id: record.id.clone(),
            })?;
        let transcript_path = self.input_dir.join(source);
        let text = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|e| AppError::file(&transcript_path, e))?;
        let (_meta, body) = parse_frontmatter(&text);
        debug!("{} 转录文本 {} 字符", ctx, body.chars().count());

        let prompt = self.template.render(
            &PromptParams::new()
                .set("bullet_count", compute_bullet_count(record.duration))
                .set("title", title),
        )?;
        let job = Job::new(
            ctx.position,
            ctx.to_string(),
            prompt,
            format!("Video title: {title}\n\nTranscript:\n{body}"),
        );

        let summary = self
            .dispatcher
            .run_job(&job)
            .await
            .map_err(|source| AppError::Job {
                label: job.label.clone(),
                source,
            })?;

        self.writer.append(&format_section(record, &summary)).await?;
        info!("{} ✓ 摘要完成", ctx);
        Ok(summary)
    }
}

/// 拆分 YAML frontmatter 与正文
///
/// 没有 frontmatter（或没有结束标记）时返回空元数据和原文。
pub fn parse_frontmatter(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut meta = BTreeMap::new();
    if !text.starts_with("---") {
        return (meta, text);
    }
    let Some(end) = text[3..].find("\n---").map(|i| i + 3) else {
        return (meta, text);
    };

    for line in text.get(4..end).unwrap_or("").lines() {
        if let Some((key, value)) = line.split_once(':') {
            meta.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    let body = text[end + 4..].trim_start_matches('\n');
    (meta, body)
}

/// 共享文档中的一个段落
pub fn format_section(record: &ProgressRecord, summary: &str) -> String {
    format!(
        "# {}\n**Date:** {} | **URL:** {}\n\n{}\n\n---\n\n",
        record.display_name(),
        record.upload_date.as_deref().unwrap_or(""),
        record.url.as_deref().unwrap_or(""),
        summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontmatter_is_split_from_body() {
        let text = "---\nid: abc\ntitle: \"Salary Tips\"\n---\n\nFirst line.\nSecond.";
        let (meta, body) = parse_frontmatter(text);
        assert_eq!(meta.get("id").map(String::as_str), Some("abc"));
        assert_eq!(meta.get("title").map(String::as_str), Some("Salary Tips"));
        assert_eq!(body, "First line.\nSecond.");
    }

    #[test]
    fn test_text_without_frontmatter_is_untouched() {
        let (meta, body) = parse_frontmatter("just a transcript");
        assert!(meta.is_empty());
        assert_eq!(body, "just a transcript");

        let unterminated = "---\nid: abc\nno closing marker";
        let (meta, body) = parse_frontmatter(unterminated);
        assert!(meta.is_empty());
        assert_eq!(body, unterminated);
    }

    #[test]
    fn test_section_format() {
        let mut record = ProgressRecord::pending("v1").with_title("Negotiate Offers");
        record.upload_date = Some("20240105".into());
        record.url = Some("https://www.youtube.com/watch?v=v1".into());

        assert_eq!(
            format_section(&record, "- ask for more"),
            "# Negotiate Offers\n**Date:** 20240105 | **URL:** https://www.youtube.com/watch?v=v1\n\n- ask for more\n\n---\n\n"
        );
    }
}
