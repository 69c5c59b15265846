//! 总是失败的持久化后端，用于测试存储层的容错路径。

use crate::error::{PersistenceError, Result};
use crate::tasks::{TaskPersistence, TaskStoreState};
use async_trait::async_trait;

/// 读写都返回 IO 错误
pub struct FailingPersistence;

#[async_trait]
impl TaskPersistence for FailingPersistence {
    async fn load(&self) -> Result<Option<TaskStoreState>> {
        Err(PersistenceError::IoError("disk unavailable".to_string()).into())
    }

    async fn save(&self, _state: &TaskStoreState) -> Result<()> {
        Err(PersistenceError::IoError("disk unavailable".to_string()).into())
    }
}
