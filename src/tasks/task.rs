//! 扫描任务定义
//!
//! 状态机：
//!
//! ```text
//! pending ──start──▶ running ──pause──▶ paused ──start──▶ running
//!                       │                  │
//!                       ├──complete──▶ completed
//!                       ├──fail──────▶ failed
//!                       └──cancel────▶ cancelled ◀──cancel── paused
//! ```
//!
//! 转换方法返回 `bool`：不合法的转换直接忽略并返回 `false`，不修改任务。

use crate::scan::{PackageRef, PackageResult, ScanConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 估算耗时时，单个包平均占用的秒数（查询 + 包间间隔）
const ESTIMATED_SECS_PER_PACKAGE: u64 = 7;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 待开始
    Pending,
    /// 扫描中
    Running,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    /// 仍在活动集合中（pending / running / paused）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused
        )
    }

    /// 终态，只会出现在历史中
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 扫描进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    /// 创建时固定为包数量
    pub total: usize,
    /// `current / total * 100`，限制在 `[0, 100]`
    pub percentage: f64,
    pub current_label: String,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total,
            percentage: 0.0,
            current_label: String::new(),
        }
    }

    fn set(&mut self, current: usize, label: impl Into<String>) {
        self.current = current;
        self.percentage = if self.total == 0 {
            0.0
        } else {
            (current as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
        };
        self.current_label = label.into();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    /// 任务 ID（UUID v4），创建后不变
    pub id: String,
    pub name: String,
    pub packages: Vec<PackageRef>,
    pub config: ScanConfig,
    pub status: TaskStatus,
    pub progress: Progress,
    /// 仅在 completed 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<PackageResult>>,
    /// 仅在 failed 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration_minutes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_minutes: Option<f64>,
    /// 已查询完的包结果（按包顺序），恢复扫描时从 `scanned.len()` 继续
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scanned: Vec<PackageResult>,
    /// 最近一次已发出进度事件的包下标，跨暂停 / 恢复保留
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced: Option<usize>,
}

impl ScanTask {
    /// 创建 pending 任务，未提供名称时以创建时间命名
    pub fn new(name: Option<String>, packages: Vec<PackageRef>, config: ScanConfig) -> Self {
        let now = Utc::now();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Scan {}", now.format("%Y-%m-%d %H:%M:%S")));
        let total = packages.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            packages,
            config,
            status: TaskStatus::Pending,
            progress: Progress::new(total),
            results: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            estimated_duration_minutes: estimate_minutes(
                total,
                Duration::from_secs(ESTIMATED_SECS_PER_PACKAGE),
            ),
            actual_duration_minutes: None,
            scanned: Vec::new(),
            announced: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// 下一个待查询包的下标
    pub fn resume_index(&self) -> usize {
        self.scanned.len()
    }

    /// 过期判定使用的时间：completed_at → started_at → created_at
    pub fn reference_timestamp(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }

    /// pending / paused → running
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Paused) {
            return false;
        }
        self.status = TaskStatus::Running;
        self.started_at.get_or_insert(now);
        true
    }

    /// running → paused
    pub fn pause(&mut self) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = TaskStatus::Paused;
        true
    }

    /// running / paused → cancelled
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(self.status, TaskStatus::Running | TaskStatus::Paused) {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.scanned.clear();
        self.finish_clock(now);
        true
    }

    /// running → completed，写入结果
    pub fn complete(&mut self, results: Vec<PackageResult>, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.scanned.clear();
        let total = self.progress.total;
        self.progress.set(total, "扫描完成");
        self.results = Some(results);
        self.finish_clock(now);
        true
    }

    /// running → failed，记录错误信息
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.scanned.clear();
        self.error = Some(error.into());
        self.finish_clock(now);
        true
    }

    /// 进程重启后，上次遗留的 running 任务不可能还在执行，改为 paused
    pub fn recover_after_restart(&mut self) -> bool {
        self.pause()
    }

    /// 即将查询第 `index` 个包
    pub fn record_progress(&mut self, index: usize, label: impl Into<String>) -> bool {
        if self.status != TaskStatus::Running || index >= self.packages.len() {
            return false;
        }
        self.progress.set(index, label);
        true
    }

    /// 标记第 `index` 个包的进度事件已发出
    ///
    /// 同一下标只返回一次 true；暂停在重试等待中、恢复后回到同一个包时返回 false。
    pub fn announce(&mut self, index: usize) -> bool {
        if self.announced.is_some_and(|last| index <= last) {
            return false;
        }
        self.announced = Some(index);
        true
    }

    /// 检查从磁盘读回的任务是否自洽，返回第一处问题
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.progress.total != self.packages.len() {
            return Err(format!(
                "progress.total = {}，包数量 = {}",
                self.progress.total,
                self.packages.len()
            ));
        }
        if self.scanned.len() > self.packages.len() {
            return Err(format!(
                "检查点有 {} 个结果，超过包数量 {}",
                self.scanned.len(),
                self.packages.len()
            ));
        }
        if self.results.is_some() != (self.status == TaskStatus::Completed) {
            return Err(format!("状态 {} 与 results 不匹配", self.status));
        }
        if self.error.is_some() != (self.status == TaskStatus::Failed) {
            return Err(format!("状态 {} 与 error 不匹配", self.status));
        }
        Ok(())
    }

    /// 只改提示文字（如重试等待），不动进度
    pub fn set_progress_label(&mut self, label: impl Into<String>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.progress.current_label = label.into();
        true
    }

    /// 记下第 `index` 个包的结果
    ///
    /// 任务暂停后仍接受正在进行的那一次查询的结果，下次恢复时不必重查。
    /// `index` 必须正好是下一个待记录的位置，重复或跳跃的写入被忽略。
    pub fn record_result(&mut self, index: usize, result: PackageResult) -> bool {
        if !self.is_active() || index != self.scanned.len() || index >= self.packages.len() {
            return false;
        }
        self.scanned.push(result);
        true
    }

    /// 所有包的漏洞总数（未完成时统计已查询部分）
    pub fn vulnerability_count(&self) -> usize {
        self.results
            .as_deref()
            .unwrap_or(&self.scanned)
            .iter()
            .map(|r| r.vulnerabilities.len())
            .sum()
    }

    /// 供列表和通知展示的摘要
    pub fn summary(&self) -> String {
        match self.status {
            TaskStatus::Completed => {
                let results = self.results.as_deref().unwrap_or_default();
                let affected = results.iter().filter(|r| !r.is_clean()).count();
                let count = self.vulnerability_count();
                if count == 0 {
                    format!("扫描了 {} 个包，未发现漏洞", results.len())
                } else {
                    format!(
                        "扫描了 {} 个包，{} 个包存在 {} 个漏洞",
                        results.len(),
                        affected,
                        count
                    )
                }
            }
            TaskStatus::Failed => {
                format!("扫描失败: {}", self.error.as_deref().unwrap_or("未知错误"))
            }
            TaskStatus::Cancelled => format!(
                "已取消（{}/{}）",
                self.progress.current, self.progress.total
            ),
            _ => format!(
                "{} {}/{} ({:.0}%)",
                self.status, self.progress.current, self.progress.total, self.progress.percentage
            ),
        }
    }

    fn finish_clock(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.actual_duration_minutes = self.started_at.map(|started| {
            let millis = (now - started).num_milliseconds().max(0) as f64;
            (millis / 60_000.0 * 100.0).round() / 100.0
        });
    }
}

/// 按包数量估算耗时（分钟，向上取整）
pub fn estimate_minutes(package_count: usize, per_package: Duration) -> u64 {
    let total_secs = per_package.as_secs_f64() * package_count as f64;
    (total_secs / 60.0).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{Severity, Vulnerability};

    fn sample_task() -> ScanTask {
        ScanTask::new(
            Some("demo".to_string()),
            vec![
                PackageRef::new("lodash", "4.17.15"),
                PackageRef::new("left-pad", "1.0.0"),
            ],
            ScanConfig::balanced(),
        )
    }

    #[test]
    fn test_new_task_defaults() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress.total, 2);
        assert_eq!(task.progress.current, 0);
        assert!(task.results.is_none());
        assert!(task.error.is_none());
        assert!(task.started_at.is_none());
        assert_eq!(task.estimated_duration_minutes, 1);

        let unnamed = ScanTask::new(None, vec![], ScanConfig::quick());
        assert!(unnamed.name.starts_with("Scan "), "应使用时间戳命名");
        assert_ne!(unnamed.id, task.id);
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let mut task = sample_task();
        let t0 = Utc::now();
        assert!(task.start(t0));
        assert_eq!(task.started_at, Some(t0));

        assert!(task.pause());
        assert!(task.start(t0 + chrono::Duration::minutes(5)));
        assert_eq!(task.started_at, Some(t0), "再次开始不覆盖 started_at");

        let results = vec![
            PackageResult::new("lodash", vec![Vulnerability::new("CVE-2020-8203", Severity::High)]),
            PackageResult::empty("left-pad"),
        ];
        assert!(task.complete(results, t0 + chrono::Duration::minutes(30)));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.results.as_ref().map(Vec::len), Some(2));
        assert!(task.error.is_none());
        assert_eq!(task.progress.percentage, 100.0);
        assert_eq!(task.actual_duration_minutes, Some(30.0));
        assert_eq!(task.reference_timestamp(), t0 + chrono::Duration::minutes(30));
    }

    #[test]
    fn test_invalid_transitions_are_noops() {
        let mut task = sample_task();
        let now = Utc::now();
        assert!(!task.pause(), "pending 不能暂停");
        assert!(!task.cancel(now), "pending 不能取消");
        assert!(!task.complete(vec![], now));
        assert!(!task.fail("boom", now));
        assert_eq!(task.status, TaskStatus::Pending);

        task.start(now);
        assert!(!task.start(now), "running 再次 start 无效果");
        task.fail("boom", now);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert!(task.results.is_none());

        // 终态不可再变
        assert!(!task.start(now));
        assert!(!task.cancel(now));
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_cancel_from_paused() {
        let mut task = sample_task();
        let now = Utc::now();
        task.start(now);
        task.record_result(0, PackageResult::empty("lodash"));
        task.pause();
        assert!(task.cancel(now));
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.completed_at.is_some());
        assert!(task.scanned.is_empty());
        assert!(task.results.is_none());
    }

    #[test]
    fn test_progress_percentage_clamped() {
        let mut task = sample_task();
        task.start(Utc::now());
        assert!(task.record_progress(1, "left-pad"));
        assert_eq!(task.progress.percentage, 50.0);
        assert_eq!(task.progress.current_label, "left-pad");
        assert!(!task.record_progress(2, "越界"), "下标越界应忽略");
        assert_eq!(task.progress.total, 2);

        let mut empty = Progress::new(0);
        empty.set(0, "");
        assert_eq!(empty.percentage, 0.0);
    }

    #[test]
    fn test_record_result_requires_next_index() {
        let mut task = sample_task();
        task.start(Utc::now());
        assert!(!task.record_result(1, PackageResult::empty("left-pad")));
        assert!(task.record_result(0, PackageResult::empty("lodash")));
        assert!(!task.record_result(0, PackageResult::empty("lodash")), "重复写入应忽略");

        task.pause();
        assert!(task.record_result(1, PackageResult::empty("left-pad")), "暂停后仍接受在途结果");
        assert_eq!(task.resume_index(), 2);
    }

    #[test]
    fn test_recover_after_restart() {
        let mut task = sample_task();
        task.start(Utc::now());
        assert!(task.recover_after_restart());
        assert_eq!(task.status, TaskStatus::Paused);

        let mut pending = sample_task();
        assert!(!pending.recover_after_restart());
        assert_eq!(pending.status, TaskStatus::Pending);
    }

    #[test]
    fn test_summary_distinguishes_clean_scan() {
        let now = Utc::now();
        let mut clean = sample_task();
        clean.start(now);
        clean.complete(
            vec![PackageResult::empty("lodash"), PackageResult::empty("left-pad")],
            now,
        );
        assert!(clean.summary().contains("未发现漏洞"));

        let mut dirty = sample_task();
        dirty.start(now);
        dirty.complete(
            vec![
                PackageResult::new("lodash", vec![Vulnerability::new("CVE-2020-8203", Severity::High)]),
                PackageResult::empty("left-pad"),
            ],
            now,
        );
        assert!(dirty.summary().contains("1 个包存在 1 个漏洞"));
        assert_eq!(clean.status, dirty.status);
    }

    #[test]
    fn test_timestamps_survive_serialization() {
        let mut task = sample_task();
        task.start(Utc::now());
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let back: ScanTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_estimate_minutes() {
        assert_eq!(estimate_minutes(0, Duration::from_secs(7)), 0);
        assert_eq!(estimate_minutes(10, Duration::from_secs(6)), 1);
        assert_eq!(estimate_minutes(11, Duration::from_secs(6)), 2);
    }

    #[test]
    fn test_announce_once_per_index() {
        let mut task = sample_task();
        assert!(task.announce(0));
        assert!(!task.announce(0), "同一下标不再发出");
        assert!(task.announce(1));
        assert!(!task.announce(0));
    }

    #[test]
    fn test_check_consistency() {
        let now = Utc::now();
        let mut task = sample_task();
        assert!(task.check_consistency().is_ok());

        task.start(now);
        task.fail("boom", now);
        assert!(task.check_consistency().is_ok());

        let mut garbled = sample_task();
        garbled.status = TaskStatus::Completed;
        assert!(garbled.check_consistency().is_err(), "completed 必须带 results");

        let mut garbled = sample_task();
        garbled.progress.total = 5;
        assert!(garbled.check_consistency().is_err());

        let mut garbled = sample_task();
        garbled.scanned = vec![PackageResult::empty("a"); 3];
        assert!(garbled.check_consistency().is_err());
    }
}
