//! 测试基础设施
//!
//! 在不访问真实漏洞库、不写磁盘的情况下测试扫描引擎各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockVulnerabilitySource`] | 替代真实漏洞源，可脚本化配额错误、网络错误、延迟和 panic |
//! | [`RecordingNotifier`] | 记录任务完成 / 失败通知 |
//! | [`FailingPersistence`] | 读写都失败的持久化后端，用于测试容错路径 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可脚本化**：通过 `with_vulnerabilities()` / `with_error()` 精确控制返回值
//! - **可观测**：通过 `call_count()` / `calls_for()` 等方法检查调用情况
//!
//! 与 `#[tokio::test(start_paused = true)]` 搭配使用时，配额等待与包间间隔都在虚拟时间中完成。
//!
//! # 使用示例
//!
//! ```rust
//! use depscan::remote::{InMemoryResultCache, RateLimiter, RemoteClient};
//! use depscan::scan::{PackageRef, ScanConfig, Severity, Vulnerability};
//! use depscan::tasks::{ScanOrchestrator, ScanRequest, TaskStore};
//! use depscan::testing::{MockVulnerabilitySource, RecordingNotifier};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = Arc::new(MockVulnerabilitySource::new().with_vulnerabilities(
//!     "lodash",
//!     vec![Vulnerability::new("CVE-2020-8203", Severity::High)],
//! ));
//! let client = RemoteClient::new(
//!     source.clone(),
//!     Arc::new(RateLimiter::per_minute(10)),
//!     Arc::new(InMemoryResultCache::new()),
//! );
//! let notifier = Arc::new(RecordingNotifier::new());
//! let orchestrator = ScanOrchestrator::builder(Arc::new(TaskStore::in_memory(10)), Arc::new(client))
//!     .notifier(notifier.clone())
//!     .build();
//!
//! let id = orchestrator
//!     .create_task(ScanRequest::new(
//!         vec![PackageRef::new("lodash", "4.17.15")],
//!         ScanConfig::balanced(),
//!     ))
//!     .await;
//! orchestrator.wait_for_idle().await;
//!
//! assert_eq!(notifier.completed(), vec![id]);
//! assert_eq!(source.call_count(), 1);
//! # }
//! ```

mod mock_notifier;
mod mock_persistence;
mod mock_source;

pub use mock_notifier::RecordingNotifier;
pub use mock_persistence::FailingPersistence;
pub use mock_source::MockVulnerabilitySource;
