//! 任务状态的持久化后端
//!
//! - [`InMemoryPersistence`]：进程内存，适合测试
//! - [`FileTaskPersistence`]：单个 JSON 文件，带 schema 版本号
//!
//! 文件格式：
//! ```json
//! { "version": 1, "active": [ ... ], "history": [ ... ] }
//! ```

use crate::error::{PersistenceError, Result};
use crate::tasks::store::{STATE_VERSION, TaskStoreState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 任务状态的存取接口
#[async_trait]
pub trait TaskPersistence: Send + Sync {
    /// 读取上次保存的状态，从未保存过时返回 `None`
    async fn load(&self) -> Result<Option<TaskStoreState>>;

    /// 整体覆盖保存
    async fn save(&self, state: &TaskStoreState) -> Result<()>;
}

// ── InMemoryPersistence ──────────────────────────────────────────────────────

/// 进程内存持久化，不落盘
#[derive(Default)]
pub struct InMemoryPersistence {
    saved: RwLock<Option<TaskStoreState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有状态初始化，模拟进程重启后读到的内容
    pub fn with_state(state: TaskStoreState) -> Self {
        Self {
            saved: RwLock::new(Some(state)),
        }
    }

    /// 最近一次保存的状态
    pub async fn saved(&self) -> Option<TaskStoreState> {
        self.saved.read().await.clone()
    }
}

#[async_trait]
impl TaskPersistence for InMemoryPersistence {
    async fn load(&self) -> Result<Option<TaskStoreState>> {
        Ok(self.saved.read().await.clone())
    }

    async fn save(&self, state: &TaskStoreState) -> Result<()> {
        *self.saved.write().await = Some(state.clone());
        Ok(())
    }
}

// ── FileTaskPersistence ──────────────────────────────────────────────────────

/// JSON 文件持久化，先写临时文件再改名，避免写到一半的文件
pub struct FileTaskPersistence {
    path: PathBuf,
}

impl FileTaskPersistence {
    /// 支持 `~/` 开头的路径，自动建父目录
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::IoError(format!("创建目录失败: {e}")))?;
        }
        info!(path = %path.display(), "🗄️ 任务状态文件");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskPersistence for FileTaskPersistence {
    async fn load(&self) -> Result<Option<TaskStoreState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PersistenceError::IoError(format!("读取状态文件失败: {e}")).into());
            }
        };

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
        let found = value
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if found != STATE_VERSION {
            return Err(PersistenceError::SchemaMismatch {
                found,
                expected: STATE_VERSION,
            }
            .into());
        }

        let state: TaskStoreState = serde_json::from_value(value)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
        debug!(
            active = state.active.len(),
            history = state.history.len(),
            "📂 已读取任务状态"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &TaskStoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| PersistenceError::IoError(format!("写入状态文件失败: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PersistenceError::IoError(format!("替换状态文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 任务状态已持久化");
        Ok(())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::scan::{PackageRef, ScanConfig};
    use crate::tasks::ScanTask;

    fn state_with_one_task() -> TaskStoreState {
        let mut state = TaskStoreState::new();
        state.active.push(ScanTask::new(
            Some("nightly".to_string()),
            vec![PackageRef::new("lodash", "4.17.15")],
            ScanConfig::balanced(),
        ));
        state
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileTaskPersistence::new(dir.path().join("nested/tasks.json")).unwrap();
        assert!(persistence.load().await.unwrap().is_none(), "文件不存在时为 None");

        let state = state_with_one_task();
        persistence.save(&state).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!persistence.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, r#"{"version": 99, "active": [], "history": []}"#).unwrap();

        let err = FileTaskPersistence::new(&path)
            .unwrap()
            .load()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Persistence(PersistenceError::SchemaMismatch {
                found: 99,
                expected: STATE_VERSION
            })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileTaskPersistence::new(&path)
            .unwrap()
            .load()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Persistence(PersistenceError::SerializationError(_))
        ));
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(
            expand_tilde(Path::new("/tmp/tasks.json")),
            PathBuf::from("/tmp/tasks.json")
        );
    }
}
