//! 断点续跑进度存储 - 基础设施层
//!
//! 唯一持有进度文件的组件。每次状态变化都在锁内完成"读取 → 修改 → 落盘"，
//! 落盘采用临时文件 + 重命名，进程中断时文件要么是旧版本要么是新版本。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, AppResult, ProgressError};
use crate::models::{ItemStatus, ProgressRecord, TransitionMeta};

/// 进度文件内容
#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    #[serde(default)]
    items: BTreeMap<String, ProgressRecord>,
}

/// 写盘用的借用视图，格式与 `StoreFile` 相同
#[derive(Serialize)]
struct StoreFileRef<'a> {
    items: &'a BTreeMap<String, ProgressRecord>,
}

/// 各状态的数量
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.done + self.failed
    }
}

/// 进度存储
pub struct ProgressStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, ProgressRecord>>,
}

impl ProgressStore {
    /// 加载进度文件，文件不存在时返回空存储
    pub async fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path).await {
            Ok(content) => {
                let file: StoreFile =
                    serde_json::from_str(&content).map_err(|e| AppError::json(&path, e))?;
                info!("已加载进度文件 {}: {} 条记录", path.display(), file.items.len());
                file.items
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("进度文件不存在，使用空存储: {}", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(AppError::file(&path, e)),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 合并新记录：只插入尚不存在的 ID，已有记录保持不变
    ///
    /// 返回新增数量。
    pub async fn merge_new(
        &self,
        records: impl IntoIterator<Item = ProgressRecord>,
    ) -> AppResult<usize> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let mut added = 0;
        for record in records {
            if !next.contains_key(&record.id) {
                next.insert(record.id.clone(), record);
                added += 1;
            }
        }
        if added > 0 {
            self.persist(&next).await?;
            *guard = next;
        }
        Ok(added)
    }

    /// 状态转换，校验通过并落盘成功后才更新内存
    pub async fn transition(
        &self,
        id: &str,
        next: ItemStatus,
        meta: TransitionMeta,
    ) -> AppResult<ProgressRecord> {
        let mut guard = self.records.lock().await;
        let current = guard
            .get(id)
            .ok_or_else(|| ProgressError::UnknownItem { id: id.to_string() })?;

        if !current.status.can_transition_to(next) {
            return Err(ProgressError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next,
            }
            .into());
        }

        let mut record = current.clone();
        record.status = next;
        if meta.output.is_some() {
            record.output = meta.output;
        }
        if meta.method.is_some() {
            record.method = meta.method;
        }
        record.error = meta.error;
        record.updated_at = Some(now());

        let mut updated = guard.clone();
        updated.insert(id.to_string(), record.clone());
        self.persist(&updated).await?;
        *guard = updated;

        debug!("[条目 {}] 状态 → {}", id, next);
        Ok(record)
    }

    /// 把上次中断遗留的 `in_progress` 记录恢复为 `pending`
    pub async fn recover_interrupted(&self) -> AppResult<usize> {
        self.reset_where(ItemStatus::InProgress).await
    }

    /// 把 `failed` 记录重置为 `pending`（人工重试）
    pub async fn reset_failed(&self) -> AppResult<usize> {
        self.reset_where(ItemStatus::Failed).await
    }

    async fn reset_where(&self, status: ItemStatus) -> AppResult<usize> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let mut reset = 0;
        for record in next.values_mut().filter(|r| r.status == status) {
            record.status = ItemStatus::Pending;
            record.error = None;
            record.updated_at = Some(now());
            reset += 1;
        }
        if reset > 0 {
            self.persist(&next).await?;
            *guard = next;
            info!("已将 {} 条 {} 记录重置为 pending", reset, status);
        }
        Ok(reset)
    }

    pub async fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// 指定状态的所有记录（按 ID 排序）
    pub async fn with_status(&self, status: ItemStatus) -> Vec<ProgressRecord> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.with_status(ItemStatus::Pending)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    pub async fn counts(&self) -> StatusCounts {
        let guard = self.records.lock().await;
        let mut counts = StatusCounts::default();
        for record in guard.values() {
            match record.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InProgress => counts.in_progress += 1,
                ItemStatus::Done => counts.done += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// 整体重写进度文件（临时文件 + 重命名）
    async fn persist(&self, records: &BTreeMap<String, ProgressRecord>) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::file(parent, e))?;
        }

        let file = StoreFileRef { items: records };
        let mut content =
            serde_json::to_string_pretty(&file).map_err(|e| AppError::json(&self.path, e))?;
        content.push('\n');

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| AppError::file(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| AppError::file(&self.path, e))?;
        Ok(())
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
