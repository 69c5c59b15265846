//! 带退避的重试查询
//!
//! - 配额耗尽：按服务端 / 限流器给出的秒数等待后重试
//! - 其他可重试错误：指数退避（`error_backoff`，每次翻倍）
//! - 尝试次数用尽或遇到不可重试错误：返回 [`RetryOutcome::GaveUp`]，由调用方按空结果处理
//!
//! 等待期间随时响应取消信号。

use crate::config::ScannerConfig;
use crate::error::RemoteError;
use crate::remote::client::{Lookup, RemoteClient};
use crate::scan::{PackageRef, ScanConfig};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 单个包的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 配额错误未携带等待时长时的默认等待
    pub default_wait: Duration,
    /// 非配额错误的首次退避
    pub error_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_wait: Duration::from_secs(30),
            error_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            default_wait: config.default_retry_wait(),
            error_backoff: config.error_backoff(),
        }
    }

    /// 第 `attempt` 次失败后应等待多久
    pub fn delay_for(&self, err: &RemoteError, attempt: u32) -> Duration {
        match err {
            RemoteError::QuotaExceeded { retry_after_secs: 0 } => self.default_wait,
            RemoteError::QuotaExceeded { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs)
            }
            _ => self.error_backoff * (1u32 << attempt.saturating_sub(1).min(5)),
        }
    }
}

/// 一次重试等待的描述
#[derive(Debug, Clone, PartialEq)]
pub struct RetryWait {
    pub package: String,
    /// 刚刚失败的是第几次尝试
    pub attempt: u32,
    pub max_attempts: u32,
    pub wait: Duration,
    pub reason: RemoteError,
}

impl RetryWait {
    /// 展示给用户的等待提示
    pub fn label(&self) -> String {
        let what = if self.reason.is_quota_exceeded() {
            "API 配额已用尽"
        } else {
            "查询失败"
        };
        format!(
            "{}: {}，{} 秒后重试 ({}/{})",
            self.package,
            what,
            self.wait.as_secs(),
            self.attempt,
            self.max_attempts
        )
    }
}

/// 重试等待的观察者
#[async_trait]
pub trait RetryObserver: Send + Sync {
    async fn on_retry_wait(&self, _wait: &RetryWait) {}
}

/// 不关心等待事件
pub struct NoopRetryObserver;

impl RetryObserver for NoopRetryObserver {}

/// 重试查询的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Found(Lookup),
    /// 放弃该包，携带最后一次错误
    GaveUp(RemoteError),
    /// 收到取消信号，该包未完成
    Cancelled,
}

impl RemoteClient {
    /// 按 `policy` 重试查询一个包
    pub async fn lookup_with_retry(
        &self,
        package: &PackageRef,
        config: &ScanConfig,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        observer: &dyn RetryObserver,
    ) -> RetryOutcome {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled;
            }
            attempt += 1;

            let err = match self.lookup(package, config).await {
                Ok(lookup) => return RetryOutcome::Found(lookup),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                warn!(
                    package = %package,
                    attempt,
                    error = %err,
                    "❌ 放弃查询，按无漏洞记录"
                );
                return RetryOutcome::GaveUp(err);
            }

            let wait = RetryWait {
                package: package.name.clone(),
                attempt,
                max_attempts,
                wait: policy.delay_for(&err, attempt),
                reason: err,
            };
            info!(package = %package, attempt, wait_secs = wait.wait.as_secs(), "⏳ {}", wait.label());
            observer.on_retry_wait(&wait).await;

            tokio::select! {
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                _ = tokio::time::sleep(wait.wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::cache::NoopResultCache;
    use crate::remote::rate_limiter::RateLimiter;
    use crate::scan::{Severity, Vulnerability};
    use crate::testing::MockVulnerabilitySource;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingObserver {
        waits: Mutex<Vec<RetryWait>>,
    }

    #[async_trait]
    impl RetryObserver for RecordingObserver {
        async fn on_retry_wait(&self, wait: &RetryWait) {
            self.waits.lock().unwrap().push(wait.clone());
        }
    }

    fn client(source: Arc<MockVulnerabilitySource>, quota: usize) -> RemoteClient {
        RemoteClient::new(
            source,
            Arc::new(RateLimiter::per_minute(quota)),
            Arc::new(NoopResultCache),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_three_times_gives_up() {
        let source = Arc::new(
            MockVulnerabilitySource::new()
                .with_quota_exceeded("lodash", 5)
                .with_quota_exceeded("lodash", 5)
                .with_quota_exceeded("lodash", 5),
        );
        let client = client(source.clone(), 10);
        let observer = RecordingObserver::default();
        let started = Instant::now();

        let outcome = client
            .lookup_with_retry(
                &PackageRef::new("lodash", "4.17.15"),
                &ScanConfig::balanced(),
                &RetryPolicy::default(),
                &CancellationToken::new(),
                &observer,
            )
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::GaveUp(RemoteError::QuotaExceeded { retry_after_secs: 5 })
        );
        assert_eq!(source.call_count(), 3, "总共尝试 3 次");
        let waits = observer.waits.lock().unwrap();
        assert_eq!(waits.len(), 2, "两次失败之间各等待一次");
        assert!(waits.iter().all(|w| w.wait == Duration::from_secs(5)));
        assert!(waits[0].label().contains("5 秒后重试"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let source = Arc::new(
            MockVulnerabilitySource::new()
                .with_quota_exceeded("lodash", 5)
                .with_vulnerabilities(
                    "lodash",
                    vec![Vulnerability::new("CVE-2020-8203", Severity::High)],
                ),
        );
        let client = client(source.clone(), 10);

        let outcome = client
            .lookup_with_retry(
                &PackageRef::new("lodash", "4.17.15"),
                &ScanConfig::balanced(),
                &RetryPolicy::default(),
                &CancellationToken::new(),
                &NoopRetryObserver,
            )
            .await;

        match outcome {
            RetryOutcome::Found(lookup) => assert_eq!(lookup.vulnerabilities().len(), 1),
            other => panic!("应该查询成功，实际: {:?}", other),
        }
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_gives_up_immediately() {
        let source = Arc::new(MockVulnerabilitySource::new().with_error(
            "ghost",
            RemoteError::ApiError {
                status: 404,
                message: "unknown package".to_string(),
            },
        ));
        let client = client(source.clone(), 10);

        let outcome = client
            .lookup_with_retry(
                &PackageRef::new("ghost", "0.0.1"),
                &ScanConfig::balanced(),
                &RetryPolicy::default(),
                &CancellationToken::new(),
                &NoopRetryObserver,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::GaveUp(_)));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let source = Arc::new(MockVulnerabilitySource::new().with_quota_exceeded("lodash", 600));
        let client = client(source.clone(), 10);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let started = Instant::now();

        let outcome = client
            .lookup_with_retry(
                &PackageRef::new("lodash", "4.17.15"),
                &ScanConfig::balanced(),
                &RetryPolicy::default(),
                &cancel,
                &NoopRetryObserver,
            )
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(600), "取消应打断等待");
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_denial_counts_as_attempt() {
        let source = Arc::new(MockVulnerabilitySource::new());
        let client = client(source.clone(), 1);
        let config = ScanConfig::balanced();
        client
            .lookup(&PackageRef::new("warmup", "1.0.0"), &config)
            .await
            .unwrap();

        // 名额被 warmup 占用，60 秒内都会被拒绝；第一次等待后窗口滑过
        let outcome = client
            .lookup_with_retry(
                &PackageRef::new("lodash", "4.17.15"),
                &config,
                &RetryPolicy::default(),
                &CancellationToken::new(),
                &NoopRetryObserver,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::Found(_)));
        assert_eq!(source.call_count(), 2);
    }

    #[test]
    fn test_delay_for() {
        let policy = RetryPolicy::default();
        let quota = RemoteError::QuotaExceeded { retry_after_secs: 0 };
        assert_eq!(policy.delay_for(&quota, 1), Duration::from_secs(30));
        let net = RemoteError::Network("reset".to_string());
        assert_eq!(policy.delay_for(&net, 1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(&net, 3), Duration::from_secs(8));
    }
}
