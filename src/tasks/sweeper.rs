//! 过期任务清理
//!
//! 周期性删除超过 `max_age` 的任务（活动与历史都会检查），正在运行的任务除外。
//! 任务的“年龄”以 [`ScanTask::reference_timestamp`] 为准。

use crate::config::ScannerConfig;
use crate::tasks::store::TaskStore;
use crate::tasks::task::{ScanTask, TaskStatus};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct ExpirySweeper {
    store: Arc<TaskStore>,
    max_age: Duration,
    interval: Duration,
    /// 尚未 `spawn` 时为 None
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<TaskStore>, max_age: Duration, interval: Duration) -> Self {
        Self {
            store,
            max_age,
            interval,
            next_run: Mutex::new(None),
        }
    }

    pub fn from_config(store: Arc<TaskStore>, config: &ScannerConfig) -> Self {
        Self::new(store, config.task_max_age(), config.sweep_interval())
    }

    /// 以 `now` 为当前时间清理一次，返回删除的任务数
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let max_age = to_chrono(self.max_age);
        let expired = |task: &ScanTask| {
            task.status != TaskStatus::Running && now - task.reference_timestamp() > max_age
        };

        self.store
            .mutate(|state| {
                let before = state.active.len() + state.history.len();
                state.active.retain(|t| !expired(t));
                state.history.retain(|t| !expired(t));
                let evicted = before - state.active.len() - state.history.len();
                (evicted > 0).then_some(evicted)
            })
            .await
            .unwrap_or(0)
    }

    /// 立即清理一次
    pub async fn run_now(&self) -> usize {
        let evicted = self.sweep_at(Utc::now()).await;
        if evicted > 0 {
            info!(evicted, "🧹 已清理过期任务");
        } else {
            debug!("没有过期任务");
        }
        evicted
    }

    /// 下一次定时清理的预计时间；定时清理未启动时为 None
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 启动定时清理：立即执行一次，之后每隔 `interval` 执行一次，直到 `token` 取消
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_now().await;
                        *self.next_run.lock().unwrap_or_else(|e| e.into_inner()) =
                            Some(Utc::now() + to_chrono(self.interval));
                    }
                }
            }
            *self.next_run.lock().unwrap_or_else(|e| e.into_inner()) = None;
            debug!("过期清理已停止");
        })
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{PackageRef, ScanConfig};

    fn task_created_at(name: &str, created_at: DateTime<Utc>) -> ScanTask {
        let mut t = ScanTask::new(
            Some(name.to_string()),
            vec![PackageRef::new("lodash", "4.17.15")],
            ScanConfig::balanced(),
        );
        t.created_at = created_at;
        t
    }

    fn sweeper(store: Arc<TaskStore>) -> ExpirySweeper {
        ExpirySweeper::new(
            store,
            Duration::from_secs(24 * 3600),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_old_tasks_evicted_running_immune() {
        let store = Arc::new(TaskStore::in_memory(10));
        let now = Utc::now();
        let old = now - chrono::Duration::hours(30);

        let mut running = task_created_at("running", old);
        running.start(old);
        let mut paused = task_created_at("paused", old);
        paused.start(old);
        paused.pause();
        let fresh = task_created_at("fresh", now - chrono::Duration::hours(1));
        let running_id = running.id.clone();
        let fresh_id = fresh.id.clone();
        store
            .mutate(|s| {
                s.active.extend([running, paused, fresh]);
                Some(())
            })
            .await;

        let evicted = sweeper(store.clone()).sweep_at(now).await;

        assert_eq!(evicted, 1);
        let snapshot = store.snapshot();
        let ids: Vec<&str> = snapshot.active.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![running_id.as_str(), fresh_id.as_str()]);
    }

    #[tokio::test]
    async fn test_history_age_uses_completion_time() {
        let store = Arc::new(TaskStore::in_memory(10));
        let now = Utc::now();

        // 两天前创建、一小时前才完成，不算过期
        let mut recent = task_created_at("recent", now - chrono::Duration::hours(48));
        recent.start(now - chrono::Duration::hours(48));
        recent.complete(vec![], now - chrono::Duration::hours(1));
        let mut stale = task_created_at("stale", now - chrono::Duration::hours(48));
        stale.start(now - chrono::Duration::hours(48));
        stale.complete(vec![], now - chrono::Duration::hours(25));
        let recent_id = recent.id.clone();
        store
            .mutate(|s| {
                s.archive(stale, 10);
                s.archive(recent, 10);
                Some(())
            })
            .await;

        assert_eq!(sweeper(store.clone()).sweep_at(now).await, 1);
        assert_eq!(store.snapshot().history.len(), 1);
        assert_eq!(store.snapshot().history[0].id, recent_id);
    }

    #[tokio::test]
    async fn test_nothing_expired_leaves_store_untouched() {
        let store = Arc::new(TaskStore::in_memory(10));
        let rx = store.subscribe();
        assert_eq!(sweeper(store.clone()).run_now().await, 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_immediately_and_stops() {
        let store = Arc::new(TaskStore::in_memory(10));
        let old = Utc::now() - chrono::Duration::hours(30);
        store
            .mutate(|s| {
                s.active.push(task_created_at("old", old));
                Some(())
            })
            .await;
        let sweeper = Arc::new(sweeper(store.clone()));
        let token = CancellationToken::new();

        assert!(sweeper.next_run().is_none(), "未启动时没有计划中的清理");
        let handle = sweeper.clone().spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.snapshot().active.is_empty(), "启动时应立即清理一次");
        assert!(sweeper.next_run().is_some_and(|at| at > Utc::now()));

        token.cancel();
        handle.await.unwrap();
        assert!(sweeper.next_run().is_none());
    }
}
