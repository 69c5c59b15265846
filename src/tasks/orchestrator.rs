//! 扫描编排器
//!
//! 把一个包列表变成一次长时间运行的后台扫描：逐个包查询漏洞、持久化进度、
//! 可随时暂停 / 恢复 / 取消。
//!
//! ## 并发模型
//!
//! - 控制操作（start / pause / cancel / delete）由一把控制锁串行化，锁里同时保存当前循环的
//!   [`CancellationToken`] 和 [`JoinHandle`]
//! - 同一时刻最多一个任务处于 running；启动新任务会先暂停正在运行的任务
//! - 新循环在发出第一次查询前等待上一个循环彻底退出，所以任何时刻最多只有一个循环在查询
//! - 扫描循环的每次写入都先确认“任务仍在运行且本轮令牌未取消”
//!
//! ## 事件
//!
//! 进度、重试等待、单包失败和任务结束通过 broadcast 发布（[`ScanEvent`]）；
//! 同一轮运行内 `Progress` 事件的 `current` 严格递增。

use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::notify::{LogNotifier, NotificationDispatcher, NotificationPreferences, ScanNotifier};
use crate::remote::{
    HttpVulnerabilitySource, InMemoryResultCache, RateLimiter, RemoteClient, RetryObserver,
    RetryOutcome, RetryPolicy, RetryWait,
};
use crate::scan::{PackageRef, PackageResult, ScanConfig};
use crate::tasks::persistence::FileTaskPersistence;
use crate::tasks::store::{StoreSnapshot, TaskStats, TaskStore};
use crate::tasks::sweeper::ExpirySweeper;
use crate::tasks::task::{Progress, ScanTask, TaskStatus, estimate_minutes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── ScanRequest ──────────────────────────────────────────────────────────────

/// 创建扫描任务的参数
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub name: Option<String>,
    pub packages: Vec<PackageRef>,
    pub config: ScanConfig,
    /// 创建后立即开始（默认 true）
    pub start_immediately: bool,
    /// 按 `config` 过滤包列表（默认 false，调用方已过滤）
    pub apply_filter: bool,
}

impl ScanRequest {
    pub fn new(packages: Vec<PackageRef>, config: ScanConfig) -> Self {
        Self {
            name: None,
            packages,
            config,
            start_immediately: true,
            apply_filter: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start_immediately(mut self, start: bool) -> Self {
        self.start_immediately = start;
        self
    }

    pub fn apply_filter(mut self, filter: bool) -> Self {
        self.apply_filter = filter;
        self
    }
}

// ── ScanEvent ────────────────────────────────────────────────────────────────

/// 编排器发布的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// 即将查询第 `progress.current` 个包
    Progress { task_id: String, progress: Progress },
    /// 查询失败，等待后重试
    Waiting {
        task_id: String,
        package: String,
        label: String,
        wait_secs: u64,
    },
    /// 重试用尽，该包按无漏洞记录
    PackageFailed {
        task_id: String,
        package: String,
        error: String,
    },
    /// 由控制操作引起的状态变化
    StatusChanged { task_id: String, status: TaskStatus },
    /// 扫描循环结束了任务（completed / failed）
    Finished { task_id: String, status: TaskStatus },
}

impl ScanEvent {
    pub fn task_id(&self) -> &str {
        match self {
            ScanEvent::Progress { task_id, .. }
            | ScanEvent::Waiting { task_id, .. }
            | ScanEvent::PackageFailed { task_id, .. }
            | ScanEvent::StatusChanged { task_id, .. }
            | ScanEvent::Finished { task_id, .. } => task_id,
        }
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 两次远程查询之间的固定间隔（命中缓存时不等待）
    pub inter_package_delay: Duration,
    pub retry: RetryPolicy,
    /// 事件通道容量，慢订阅者超出后会丢事件
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            inter_package_delay: Duration::from_secs(6),
            retry: RetryPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            inter_package_delay: config.inter_package_delay(),
            retry: RetryPolicy::from_config(config),
            ..Self::default()
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct ScanOrchestratorBuilder {
    store: Arc<TaskStore>,
    client: Arc<RemoteClient>,
    settings: OrchestratorSettings,
    notifier: Arc<dyn ScanNotifier>,
    preferences: NotificationPreferences,
    sweeper: Option<Arc<ExpirySweeper>>,
}

impl ScanOrchestratorBuilder {
    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ScanNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn preferences(mut self, preferences: NotificationPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// 未设置时使用 24 小时过期、每小时清理的默认清理器
    pub fn sweeper(mut self, sweeper: Arc<ExpirySweeper>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    pub fn build(self) -> ScanOrchestrator {
        let sweeper = self.sweeper.unwrap_or_else(|| {
            Arc::new(ExpirySweeper::new(
                self.store.clone(),
                Duration::from_secs(24 * 3600),
                Duration::from_secs(3600),
            ))
        });
        let (events, _) = broadcast::channel(self.settings.event_capacity.max(1));
        let (running_tx, _) = watch::channel(self.store.snapshot().running().cloned());
        let (live_loops, _) = watch::channel(0usize);

        ScanOrchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                client: self.client,
                settings: self.settings,
                notifications: NotificationDispatcher::new(self.notifier, self.preferences),
                sweeper,
                control: Mutex::new(None),
                events,
                running_tx,
                live_loops,
            }),
        }
    }
}

// ── ScanOrchestrator ─────────────────────────────────────────────────────────

/// 后台扫描编排器，可廉价克隆
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<TaskStore>,
    client: Arc<RemoteClient>,
    settings: OrchestratorSettings,
    notifications: NotificationDispatcher,
    sweeper: Arc<ExpirySweeper>,
    /// 当前（或最近一次）扫描循环
    control: Mutex<Option<ActiveRun>>,
    events: broadcast::Sender<ScanEvent>,
    running_tx: watch::Sender<Option<ScanTask>>,
    /// 尚未退出的扫描循环数量
    live_loops: watch::Sender<usize>,
}

struct ActiveRun {
    task_id: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

enum LoopExit {
    /// 所有包都已查询
    Exhausted,
    /// 被暂停 / 取消 / 删除，或任务已不在运行
    Stopped,
}

impl ScanOrchestrator {
    pub fn builder(store: Arc<TaskStore>, client: Arc<RemoteClient>) -> ScanOrchestratorBuilder {
        ScanOrchestratorBuilder {
            store,
            client,
            settings: OrchestratorSettings::default(),
            notifier: Arc::new(LogNotifier),
            preferences: NotificationPreferences::default(),
            sweeper: None,
        }
    }

    /// 按配置组装完整的编排器：文件持久化、HTTP 漏洞源、内存结果缓存、日志通知
    pub async fn from_config(config: &ScannerConfig) -> Result<Self> {
        let persistence = Arc::new(FileTaskPersistence::new(&config.state_path)?);
        let store = Arc::new(TaskStore::open(persistence, config.history_capacity).await);
        let source = Arc::new(HttpVulnerabilitySource::from_config(config)?);
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_minute,
            config.quota_window(),
        ));
        let client = RemoteClient::new(source, limiter, Arc::new(InMemoryResultCache::new()))
            .with_timeout(config.request_timeout());
        let sweeper = Arc::new(ExpirySweeper::from_config(store.clone(), config));

        let orchestrator = Self::builder(store, Arc::new(client))
            .settings(OrchestratorSettings::from_config(config))
            .preferences(config.notifications)
            .sweeper(sweeper)
            .build();
        // 进程启动时先清理一次，之后由 spawn_sweeper 定时执行
        orchestrator.manual_cleanup().await;
        Ok(orchestrator)
    }

    // ── 任务控制 ──────────────────────────────────────────────────────────────

    /// 创建任务，返回任务 ID
    pub async fn create_task(&self, request: ScanRequest) -> String {
        let packages = if request.apply_filter {
            let before = request.packages.len();
            let kept: Vec<PackageRef> = request
                .packages
                .into_iter()
                .filter(|p| request.config.accepts(p))
                .collect();
            debug!(before, after = kept.len(), config = %request.config.name, "按扫描配置过滤包");
            kept
        } else {
            request.packages
        };

        let mut task = ScanTask::new(request.name, packages, request.config);
        task.estimated_duration_minutes =
            estimate_minutes(task.packages.len(), self.per_package_estimate());
        let id = task.id.clone();
        info!(
            task_id = %id,
            name = %task.name,
            packages = task.packages.len(),
            config = %task.config.name,
            "📝 创建扫描任务"
        );

        self.inner
            .store
            .mutate(|state| {
                state.active.push(task);
                Some(())
            })
            .await;

        if request.start_immediately {
            self.start(&id).await;
        }
        id
    }

    /// 开始或恢复任务；已在运行、不存在或已结束时返回 false
    pub async fn start(&self, task_id: &str) -> bool {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        let now = Utc::now();

        let displaced = inner
            .store
            .mutate(|state| {
                let status = state.active.iter().find(|t| t.id == task_id)?.status;
                if !matches!(status, TaskStatus::Pending | TaskStatus::Paused) {
                    return None;
                }
                let mut displaced = Vec::new();
                for other in state.active.iter_mut().filter(|t| t.id != task_id) {
                    if other.pause() {
                        displaced.push(other.id.clone());
                    }
                }
                state.find_active_mut(task_id)?.start(now);
                Some(displaced)
            })
            .await;
        let Some(displaced) = displaced else {
            debug!(task_id, "任务无法开始，忽略");
            return false;
        };

        let previous = control.take();
        if let Some(run) = &previous {
            run.token.cancel();
        }
        for id in displaced {
            info!(task_id = %id, "⏸️ 任务已暂停，让位给新任务");
            inner.emit(ScanEvent::StatusChanged {
                task_id: id,
                status: TaskStatus::Paused,
            });
        }

        let token = CancellationToken::new();
        let guard = LoopGuard::new(inner.clone());
        let handle = tokio::spawn(supervise(
            guard,
            task_id.to_string(),
            token.clone(),
            previous.map(|run| run.handle),
        ));
        *control = Some(ActiveRun {
            task_id: task_id.to_string(),
            token,
            handle,
        });

        info!(task_id, "▶️ 开始扫描任务");
        inner.emit(ScanEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Running,
        });
        inner.publish_running();
        true
    }

    /// 暂停正在运行的任务；正在进行的那一次查询会完成并被记录
    pub async fn pause(&self, task_id: &str) -> bool {
        let inner = &self.inner;
        let control = inner.control.lock().await;

        let paused = inner
            .store
            .mutate(|state| state.find_active_mut(task_id)?.pause().then_some(()))
            .await
            .is_some();
        if !paused {
            debug!(task_id, "任务不在运行，忽略暂停");
            return false;
        }
        if let Some(run) = control.as_ref()
            && run.task_id == task_id
        {
            run.token.cancel();
        }

        info!(task_id, "⏸️ 暂停扫描任务");
        inner.emit(ScanEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Paused,
        });
        inner.publish_running();
        true
    }

    /// 取消运行中或已暂停的任务，任务移入历史
    pub async fn cancel(&self, task_id: &str) -> bool {
        let inner = &self.inner;
        let control = inner.control.lock().await;
        let now = Utc::now();
        let capacity = inner.store.history_capacity();

        let cancelled = inner
            .store
            .mutate(|state| {
                if !state.find_active_mut(task_id)?.cancel(now) {
                    return None;
                }
                let task = state.take_active(task_id)?;
                state.archive(task, capacity);
                Some(())
            })
            .await
            .is_some();
        if !cancelled {
            debug!(task_id, "任务无法取消，忽略");
            return false;
        }
        if let Some(run) = control.as_ref()
            && run.task_id == task_id
        {
            run.token.cancel();
        }

        info!(task_id, "🛑 取消扫描任务");
        inner.emit(ScanEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Cancelled,
        });
        inner.publish_running();
        true
    }

    /// 从历史或活动集合删除任务；删除运行中的任务会先停止它的循环
    pub async fn delete(&self, task_id: &str) -> bool {
        let inner = &self.inner;
        let control = inner.control.lock().await;
        if let Some(run) = control.as_ref()
            && run.task_id == task_id
        {
            run.token.cancel();
        }

        let removed = inner.store.mutate(|state| state.remove(task_id)).await;
        match removed {
            Some(task) => {
                info!(task_id, status = %task.status, "🗑️ 删除扫描任务");
                inner.publish_running();
                true
            }
            None => false,
        }
    }

    // ── 查询 ─────────────────────────────────────────────────────────────────

    pub fn get_task(&self, task_id: &str) -> Option<ScanTask> {
        self.inner.store.get(task_id)
    }

    pub fn get_running_task(&self) -> Option<ScanTask> {
        self.inner.store.snapshot().running().cloned()
    }

    pub fn task_stats(&self) -> TaskStats {
        self.inner.store.snapshot().stats()
    }

    pub fn list_active(&self) -> Vec<ScanTask> {
        self.inner.store.snapshot().active.clone()
    }

    /// 历史任务，最新的在前
    pub fn list_history(&self) -> Vec<ScanTask> {
        self.inner.store.snapshot().history.clone()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.inner.store
    }

    // ── 订阅 ─────────────────────────────────────────────────────────────────

    pub fn subscribe_store(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.store.subscribe()
    }

    /// 订阅当前运行中的任务（含进度）
    pub fn subscribe_running(&self) -> watch::Receiver<Option<ScanTask>> {
        self.inner.running_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// 以 [`Stream`] 形式订阅事件；订阅者落后时跳过丢失的事件
    pub fn event_stream(&self) -> impl Stream<Item = ScanEvent> + Send + 'static {
        let mut rx = self.inner.events.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "⚠️ 事件订阅者处理过慢，已跳过部分事件");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // ── 过期清理 ─────────────────────────────────────────────────────────────

    /// 立即清理过期任务，返回删除数量
    pub async fn manual_cleanup(&self) -> usize {
        let evicted = self.inner.sweeper.run_now().await;
        self.inner.publish_running();
        evicted
    }

    /// 下一次定时清理的时间；`spawn_sweeper` 之前为 None
    pub fn next_cleanup_time(&self) -> Option<DateTime<Utc>> {
        self.inner.sweeper.next_run()
    }

    /// 启动定时清理，直到 `token` 取消
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        self.inner.sweeper.clone().spawn(token)
    }

    /// 等待所有扫描循环退出（任务完成、失败，或暂停后在途查询收尾）
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.live_loops.subscribe();
        let _ = rx.wait_for(|live| *live == 0).await;
    }

    fn per_package_estimate(&self) -> Duration {
        self.inner.settings.inter_package_delay + Duration::from_secs(1)
    }
}

// ── 扫描循环 ─────────────────────────────────────────────────────────────────

impl Inner {
    fn emit(&self, event: ScanEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }

    fn publish_running(&self) {
        self.running_tx.send_if_modified(|current| {
            // 快照须在 watch 锁内读取，否则并发调用可能回写旧的 running 任务
            let running = self.store.snapshot().running().cloned();
            if *current == running {
                return false;
            }
            *current = running;
            true
        });
    }

    async fn finish_completed(&self, task_id: &str, token: &CancellationToken) {
        let now = Utc::now();
        let capacity = self.store.history_capacity();
        let finished = self
            .store
            .mutate(|state| {
                if token.is_cancelled() {
                    return None;
                }
                let task = state.find_active_mut(task_id)?;
                if task.status != TaskStatus::Running {
                    return None;
                }
                let results = std::mem::take(&mut task.scanned);
                task.complete(results, now);
                let task = state.take_active(task_id)?;
                state.archive(task.clone(), capacity);
                Some(task)
            })
            .await;

        let Some(task) = finished else {
            debug!(task_id, "任务已不在运行，跳过完成处理");
            return;
        };
        info!(
            task_id,
            vulnerabilities = task.vulnerability_count(),
            minutes = task.actual_duration_minutes.unwrap_or_default(),
            "✅ 扫描任务完成"
        );
        self.emit(ScanEvent::Finished {
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
        });
        self.notifications.task_completed(&task).await;
    }

    async fn finish_failed(&self, task_id: &str, message: String) {
        let now = Utc::now();
        let capacity = self.store.history_capacity();
        let failed = self
            .store
            .mutate(|state| {
                if !state.find_active_mut(task_id)?.fail(message.clone(), now) {
                    return None;
                }
                let task = state.take_active(task_id)?;
                state.archive(task.clone(), capacity);
                Some(task)
            })
            .await;

        let Some(task) = failed else {
            warn!(task_id, error = %message, "扫描循环异常退出，但任务已不在运行");
            return;
        };
        error!(task_id, error = %message, "❌ 扫描任务失败");
        self.emit(ScanEvent::Finished {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
        });
        self.notifications.task_failed(&task).await;
    }
}

/// 存活期间计入 `live_loops`
struct LoopGuard(Arc<Inner>);

impl LoopGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.live_loops.send_modify(|live| *live += 1);
        Self(inner)
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0
            .live_loops
            .send_modify(|live| *live = live.saturating_sub(1));
    }
}

/// 外层监督：等待上一个循环退出，运行扫描循环，把错误和 panic 转为任务失败
async fn supervise(
    guard: LoopGuard,
    task_id: String,
    token: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    let inner = guard.0.clone();
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let worker = tokio::spawn(run_loop(inner.clone(), task_id.clone(), token.clone()));
    match worker.await {
        Ok(Ok(LoopExit::Exhausted)) => inner.finish_completed(&task_id, &token).await,
        Ok(Ok(LoopExit::Stopped)) => debug!(task_id = %task_id, "扫描循环已停止"),
        Ok(Err(e)) => inner.finish_failed(&task_id, e.to_string()).await,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            inner.finish_failed(&task_id, message).await;
        }
        Err(e) => warn!(task_id = %task_id, error = %e, "扫描循环被中止"),
    }
    inner.publish_running();
    drop(guard);
}

async fn run_loop(
    inner: Arc<Inner>,
    task_id: String,
    token: CancellationToken,
) -> Result<LoopExit> {
    let Some(task) = inner.store.get(&task_id) else {
        return Ok(LoopExit::Stopped);
    };
    if task.status != TaskStatus::Running || token.is_cancelled() {
        return Ok(LoopExit::Stopped);
    }

    let total = task.packages.len();
    let resume_from = task.resume_index();
    if resume_from > total {
        return Err(ScanError::Other(format!(
            "检查点记录了 {resume_from} 个结果，但任务只有 {total} 个包"
        )));
    }
    info!(task_id = %task_id, total, resume_from, "🔍 扫描循环启动");

    let observer = LoopObserver {
        inner: &inner,
        task_id: &task_id,
        token: &token,
    };
    for (index, package) in task.packages.iter().enumerate().skip(resume_from) {
        if token.is_cancelled() {
            return Ok(LoopExit::Stopped);
        }

        let progress = inner
            .store
            .mutate(|state| {
                if token.is_cancelled() {
                    return None;
                }
                let task = state.find_active_mut(&task_id)?;
                if !task.record_progress(index, package.name.clone()) {
                    return None;
                }
                let fresh = task.announce(index);
                Some((task.progress.clone(), fresh))
            })
            .await;
        let Some((progress, fresh)) = progress else {
            return Ok(LoopExit::Stopped);
        };
        // 暂停前已为该包发过进度事件时，恢复后不再重复
        if fresh {
            inner.emit(ScanEvent::Progress {
                task_id: task_id.clone(),
                progress,
            });
        }
        inner.publish_running();

        let outcome = inner
            .client
            .lookup_with_retry(
                package,
                &task.config,
                &inner.settings.retry,
                &token,
                &observer,
            )
            .await;
        let (result, remote) = match outcome {
            RetryOutcome::Found(lookup) => {
                let remote = lookup.is_remote();
                let result = PackageResult::new(&package.name, lookup.into_vulnerabilities());
                debug!(
                    package = %package,
                    vulnerabilities = result.vulnerabilities.len(),
                    remote,
                    "包查询完成"
                );
                (result, remote)
            }
            RetryOutcome::GaveUp(err) => {
                inner.emit(ScanEvent::PackageFailed {
                    task_id: task_id.clone(),
                    package: package.name.clone(),
                    error: err.to_string(),
                });
                (PackageResult::empty(&package.name), false)
            }
            RetryOutcome::Cancelled => return Ok(LoopExit::Stopped),
        };

        // 暂停后仍记录在途查询的结果，恢复时不必重查
        let recorded = inner
            .store
            .mutate(|state| {
                state
                    .find_active_mut(&task_id)?
                    .record_result(index, result)
                    .then_some(())
            })
            .await;
        if recorded.is_none() || token.is_cancelled() {
            return Ok(LoopExit::Stopped);
        }

        let delay = inner.settings.inter_package_delay;
        if remote && index + 1 < total && !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return Ok(LoopExit::Stopped),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Ok(LoopExit::Exhausted)
}

/// 把重试等待写进任务进度并发布事件
struct LoopObserver<'a> {
    inner: &'a Inner,
    task_id: &'a str,
    token: &'a CancellationToken,
}

#[async_trait]
impl<'a> RetryObserver for LoopObserver<'a> {
    async fn on_retry_wait(&self, wait: &RetryWait) {
        let label = wait.label();
        let token = self.token;
        let task_id = self.task_id;
        self.inner
            .store
            .mutate(|state| {
                if token.is_cancelled() {
                    return None;
                }
                state
                    .find_active_mut(task_id)?
                    .set_progress_label(label.clone())
                    .then_some(())
            })
            .await;
        self.inner.emit(ScanEvent::Waiting {
            task_id: task_id.to_string(),
            package: wait.package.clone(),
            label,
            wait_secs: wait.wait.as_secs(),
        });
        self.inner.publish_running();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("扫描循环崩溃: {detail}")
}
