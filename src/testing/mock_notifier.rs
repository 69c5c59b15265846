//! 记录通知的 [`ScanNotifier`]，用于断言编排器在任务结束时是否发出了通知。

use crate::notify::ScanNotifier;
use crate::tasks::ScanTask;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// 记录收到的完成 / 失败通知（任务 ID，按时序）
#[derive(Default)]
pub struct RecordingNotifier {
    completed: Arc<Mutex<Vec<String>>>,
    failed: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanNotifier for RecordingNotifier {
    async fn on_task_completed(&self, task: &ScanTask) {
        self.completed.lock().unwrap().push(task.id.clone());
    }

    async fn on_task_failed(&self, task: &ScanTask) {
        self.failed.lock().unwrap().push(task.id.clone());
    }
}
