//! 共享文档写入 - 业务能力层
//!
//! 多个条目并发完成时追加到同一个输出文件，写入通过一把锁串行化。

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 追加写入的共享文档
///
/// 职责：
/// - 保证每次追加的内容完整写入，不与其他任务交错
/// - 不关心内容格式
pub struct DocumentWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DocumentWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一段内容
    pub async fn append(&self, section: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::file(&self.path, e))?;

        file.write_all(section.as_bytes())
            .await
            .map_err(|e| AppError::file(&self.path, e))?;
        file.flush().await.map_err(|e| AppError::file(&self.path, e))?;

        debug!("已追加 {} 字节到 {}", section.len(), self.path.display());
        Ok(())
    }
}
