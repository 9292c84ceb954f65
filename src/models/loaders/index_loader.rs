use crate::error::{AppError, AppResult};
use crate::models::progress::ProgressRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// 已完成转录、可以进入摘要流程的状态
const TRANSCRIBED: &str = "transcribed";

/// 视频清单（index.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoIndex {
    #[serde(default)]
    pub videos: Vec<VideoEntry>,
}

/// 清单中的单个视频
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub upload_date: String,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub transcript_file: Option<String>,
}

impl VideoIndex {
    /// 可摘要的视频：已转录且有转录文件
    pub fn eligible(&self) -> impl Iterator<Item = &VideoEntry> {
        self.videos
            .iter()
            .filter(|v| v.status == TRANSCRIBED && v.transcript_file.is_some())
    }
}

impl VideoEntry {
    /// 转换为待处理的进度记录
    pub fn to_record(&self) -> ProgressRecord {
        let mut record = ProgressRecord::pending(&self.id).with_title(&self.title);
        record.url = Some(self.url.clone()).filter(|u| !u.is_empty());
        record.upload_date = Some(self.upload_date.clone()).filter(|d| !d.is_empty());
        record.duration = self.duration;
        record.source = self.transcript_file.clone();
        record
    }
}

/// 从 index.json 加载视频清单
pub async fn load_video_index(index_path: &Path) -> AppResult<VideoIndex> {
    let content = fs::read_to_string(index_path)
        .await
        .map_err(|e| AppError::file(index_path, e))?;

    let index: VideoIndex =
        serde_json::from_str(&content).map_err(|e| AppError::json(index_path, e))?;

    tracing::info!(
        "已加载清单 {}: 共 {} 个视频",
        index_path.display(),
        index.videos.len()
    );

    Ok(index)
}
