//! 任务结束通知
//!
//! 编排器在任务完成 / 失败时调用 [`ScanNotifier`]；是否真正送达由
//! [`NotificationPreferences`] 决定。展示形式（桌面通知、Webhook 等）由实现方负责。

use crate::tasks::ScanTask;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 用户级通知偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub task_completed: bool,
    pub task_failed: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            task_completed: true,
            task_failed: true,
        }
    }
}

#[async_trait]
pub trait ScanNotifier: Send + Sync {
    async fn on_task_completed(&self, _task: &ScanTask) {}
    async fn on_task_failed(&self, _task: &ScanTask) {}
}

/// 按偏好过滤后转发给下游通知器
pub struct NotificationDispatcher {
    notifier: Arc<dyn ScanNotifier>,
    preferences: NotificationPreferences,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn ScanNotifier>, preferences: NotificationPreferences) -> Self {
        Self {
            notifier,
            preferences,
        }
    }

    pub fn preferences(&self) -> NotificationPreferences {
        self.preferences
    }

    pub async fn task_completed(&self, task: &ScanTask) {
        if self.preferences.task_completed {
            self.notifier.on_task_completed(task).await;
        }
    }

    pub async fn task_failed(&self, task: &ScanTask) {
        if self.preferences.task_failed {
            self.notifier.on_task_failed(task).await;
        }
    }
}

/// 把通知写入日志
pub struct LogNotifier;

#[async_trait]
impl ScanNotifier for LogNotifier {
    async fn on_task_completed(&self, task: &ScanTask) {
        info!(task_id = %task.id, name = %task.name, "✅ 扫描完成: {}", task.summary());
    }

    async fn on_task_failed(&self, task: &ScanTask) {
        warn!(
            task_id = %task.id,
            name = %task.name,
            error = task.error.as_deref().unwrap_or(""),
            "❌ 扫描失败"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{PackageRef, ScanConfig};
    use crate::testing::RecordingNotifier;

    #[tokio::test]
    async fn test_preferences_gate_delivery() {
        let recorder = Arc::new(RecordingNotifier::new());
        let dispatcher = NotificationDispatcher::new(
            recorder.clone(),
            NotificationPreferences {
                task_completed: false,
                task_failed: true,
            },
        );
        let task = ScanTask::new(
            None,
            vec![PackageRef::new("lodash", "4.17.15")],
            ScanConfig::balanced(),
        );

        dispatcher.task_completed(&task).await;
        dispatcher.task_failed(&task).await;

        assert!(recorder.completed().is_empty(), "完成通知已关闭");
        assert_eq!(recorder.failed(), vec![task.id.clone()]);
    }
}
