//! Mock 漏洞源，用于在不发起真实 HTTP 请求的情况下测试 [`RemoteClient`] 与编排器。
//!
//! # 示例
//!
//! ```rust
//! use depscan::testing::MockVulnerabilitySource;
//! use depscan::remote::VulnerabilitySource;
//! use depscan::scan::{PackageRef, Severity, Vulnerability};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockVulnerabilitySource::new()
//!     .with_quota_exceeded("lodash", 5)
//!     .with_vulnerabilities("lodash", vec![Vulnerability::new("CVE-2020-8203", Severity::High)]);
//!
//! let pkg = PackageRef::new("lodash", "4.17.15");
//! assert!(mock.query(&pkg).await.is_err());          // 先消费一次性的配额错误
//! assert_eq!(mock.query(&pkg).await.unwrap().len(), 1);
//! assert_eq!(mock.call_count(), 2);
//! # }
//! ```
//!
//! [`RemoteClient`]: crate::remote::RemoteClient

use crate::error::RemoteError;
use crate::remote::{RemoteResult, VulnerabilitySource};
use crate::scan::{PackageRef, Vulnerability};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 可脚本化的 Mock 漏洞源
///
/// 每个包的应答顺序：先按顺序消费一次性应答（[`with_error`](Self::with_error) /
/// [`with_quota_exceeded`](Self::with_quota_exceeded)），耗尽后返回
/// [`with_vulnerabilities`](Self::with_vulnerabilities) 设置的固定结果；
/// 未配置的包返回空列表。
pub struct MockVulnerabilitySource {
    scripted: Arc<Mutex<HashMap<String, VecDeque<RemoteResult<Vec<Vulnerability>>>>>>,
    fixed: Arc<Mutex<HashMap<String, Vec<Vulnerability>>>>,
    panics: Arc<Mutex<HashSet<String>>>,
    latency: Duration,
    /// 按时序记录被查询的包名
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockVulnerabilitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVulnerabilitySource {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(HashMap::new())),
            fixed: Arc::new(Mutex::new(HashMap::new())),
            panics: Arc::new(Mutex::new(HashSet::new())),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// 设置包的固定查询结果
    pub fn with_vulnerabilities(self, package: &str, vulnerabilities: Vec<Vulnerability>) -> Self {
        self.fixed
            .lock()
            .unwrap()
            .insert(package.to_string(), vulnerabilities);
        self
    }

    /// 追加一次性错误
    pub fn with_error(self, package: &str, err: RemoteError) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(package.to_string())
            .or_default()
            .push_back(Err(err));
        self
    }

    /// 追加一次配额耗尽错误（常用的便捷方法）
    pub fn with_quota_exceeded(self, package: &str, retry_after_secs: u64) -> Self {
        self.with_error(package, RemoteError::QuotaExceeded { retry_after_secs })
    }

    /// 查询该包时直接 panic，用于测试扫描循环的崩溃处理
    pub fn with_panic(self, package: &str) -> Self {
        self.panics.lock().unwrap().insert(package.to_string());
        self
    }

    /// 每次查询的模拟耗时
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 所有查询过的包名（按时序排列）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, package: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == package)
            .count()
    }

    /// 同时进行中的查询数峰值
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VulnerabilitySource for MockVulnerabilitySource {
    async fn query(&self, package: &PackageRef) -> RemoteResult<Vec<Vulnerability>> {
        self.calls.lock().unwrap().push(package.name.clone());
        if self.panics.lock().unwrap().contains(&package.name) {
            panic!("mock source panicked on {}", package.name);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&package.name)
            .and_then(|queue| queue.pop_front());
        if let Some(response) = scripted {
            return response;
        }
        Ok(self
            .fixed
            .lock()
            .unwrap()
            .get(&package.name)
            .cloned()
            .unwrap_or_default())
    }
}
