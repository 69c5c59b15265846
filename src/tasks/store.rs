//! 任务存储
//!
//! 活动任务与历史任务的唯一数据源。所有修改都经过 [`TaskStore::mutate`]：
//! 在锁内修改，修改后尽力持久化，并通过 watch 通道发布新快照。
//! 持久化失败只记日志，不影响内存状态。

use crate::tasks::persistence::{InMemoryPersistence, TaskPersistence};
use crate::tasks::task::{ScanTask, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// 状态文件的 schema 版本
pub const STATE_VERSION: u32 = 1;

/// 持久化的完整状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStoreState {
    pub version: u32,
    /// 未结束的任务，按创建顺序
    #[serde(default)]
    pub active: Vec<ScanTask>,
    /// 已结束的任务，最新的在前
    #[serde(default)]
    pub history: Vec<ScanTask>,
}

impl Default for TaskStoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStoreState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            active: Vec::new(),
            history: Vec::new(),
        }
    }

    /// 按 ID 查找（先活动后历史）
    pub fn find(&self, id: &str) -> Option<&ScanTask> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|t| t.id == id)
    }

    pub fn find_active_mut(&mut self, id: &str) -> Option<&mut ScanTask> {
        self.active.iter_mut().find(|t| t.id == id)
    }

    /// 当前处于 running 的任务
    pub fn running(&self) -> Option<&ScanTask> {
        self.active
            .iter()
            .find(|t| t.status == TaskStatus::Running)
    }

    /// 从活动集合移出
    pub fn take_active(&mut self, id: &str) -> Option<ScanTask> {
        let pos = self.active.iter().position(|t| t.id == id)?;
        Some(self.active.remove(pos))
    }

    /// 放入历史头部，超出 `capacity` 的最旧记录被丢弃
    pub fn archive(&mut self, task: ScanTask, capacity: usize) {
        self.history.insert(0, task);
        self.history.truncate(capacity);
    }

    /// 从历史或活动集合中删除
    pub fn remove(&mut self, id: &str) -> Option<ScanTask> {
        if let Some(pos) = self.history.iter().position(|t| t.id == id) {
            return Some(self.history.remove(pos));
        }
        self.take_active(id)
    }

    /// 校验读回的状态
    ///
    /// 活动集合只含 pending / running / paused，历史只含终态，ID 全局唯一，
    /// 每个任务自身的字段一致（见 [`ScanTask::check_consistency`]）。
    pub fn validate(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for task in self.active.iter().chain(self.history.iter()) {
            if !ids.insert(task.id.as_str()) {
                return Err(format!("任务 ID 重复: {}", task.id));
            }
            task.check_consistency()
                .map_err(|e| format!("任务 {}: {e}", task.id))?;
        }
        if let Some(task) = self.active.iter().find(|t| !t.is_active()) {
            return Err(format!("活动集合中有 {} 状态的任务 {}", task.status, task.id));
        }
        if let Some(task) = self.history.iter().find(|t| !t.status.is_terminal()) {
            return Err(format!("历史中有 {} 状态的任务 {}", task.status, task.id));
        }
        Ok(())
    }

    pub fn stats(&self) -> TaskStats {
        let count = |tasks: &[ScanTask], status: TaskStatus| {
            tasks.iter().filter(|t| t.status == status).count()
        };
        TaskStats {
            active: self.active.len(),
            pending: count(&self.active, TaskStatus::Pending),
            running: count(&self.active, TaskStatus::Running),
            paused: count(&self.active, TaskStatus::Paused),
            completed: count(&self.history, TaskStatus::Completed),
            failed: count(&self.history, TaskStatus::Failed),
            cancelled: count(&self.history, TaskStatus::Cancelled),
        }
    }
}

/// 发布给订阅者的只读快照
pub type StoreSnapshot = Arc<TaskStoreState>;

/// 各状态的任务数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub active: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// 带持久化与变更广播的任务存储
pub struct TaskStore {
    state: Mutex<TaskStoreState>,
    persistence: Arc<dyn TaskPersistence>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
    history_capacity: usize,
}

impl TaskStore {
    /// 读取持久化状态并做启动恢复
    ///
    /// - 读取失败（文件损坏 / 版本不符）或内容校验不通过：记录警告，从空状态开始
    /// - 上次遗留的 running 任务改为 paused
    /// - 历史超出容量的部分被丢弃
    pub async fn open(persistence: Arc<dyn TaskPersistence>, history_capacity: usize) -> Self {
        let mut state = match persistence.load().await {
            Ok(Some(state)) => match state.validate() {
                Ok(()) => state,
                Err(reason) => {
                    warn!(reason = %reason, "⚠️ 任务状态校验失败，从空状态开始");
                    TaskStoreState::new()
                }
            },
            Ok(None) => TaskStoreState::new(),
            Err(e) => {
                warn!(error = %e, "⚠️ 任务状态读取失败，从空状态开始");
                TaskStoreState::new()
            }
        };

        let mut recovered = 0;
        for task in state.active.iter_mut() {
            if task.recover_after_restart() {
                recovered += 1;
            }
        }
        let before = state.history.len();
        state.history.truncate(history_capacity);
        let trimmed = before - state.history.len();

        if recovered > 0 || trimmed > 0 {
            info!(recovered, trimmed, "🔄 已恢复上次中断的任务");
            if let Err(e) = persistence.save(&state).await {
                warn!(error = %e, "⚠️ 任务状态保存失败");
            }
        }
        info!(
            active = state.active.len(),
            history = state.history.len(),
            "🗂️ TaskStore 初始化"
        );

        Self::from_state(state, persistence, history_capacity)
    }

    /// 纯内存存储，不读取任何已有状态
    pub fn in_memory(history_capacity: usize) -> Self {
        Self::from_state(
            TaskStoreState::new(),
            Arc::new(InMemoryPersistence::new()),
            history_capacity,
        )
    }

    fn from_state(
        state: TaskStoreState,
        persistence: Arc<dyn TaskPersistence>,
        history_capacity: usize,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(state.clone()));
        Self {
            state: Mutex::new(state),
            persistence,
            snapshot_tx,
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// 在锁内修改状态
    ///
    /// 闭包返回 `None` 表示未做修改：不落盘，不发布快照。
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut TaskStoreState) -> Option<R>) -> Option<R> {
        let mut state = self.state.lock().await;
        let result = f(&mut state)?;

        if let Err(e) = self.persistence.save(&state).await {
            warn!(error = %e, "⚠️ 任务状态保存失败，仅保留内存状态");
        }
        self.snapshot_tx.send_replace(Arc::new(state.clone()));
        debug!(active = state.active.len(), history = state.history.len(), "任务状态已更新");
        Some(result)
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<ScanTask> {
        self.snapshot().find(id).cloned()
    }
}
