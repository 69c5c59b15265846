//! 单次查询客户端：缓存 → 限流 → 远程查询

use crate::error::RemoteError;
use crate::remote::RemoteResult;
use crate::remote::cache::{CacheKey, ResultCache};
use crate::remote::rate_limiter::RateLimiter;
use crate::remote::source::VulnerabilitySource;
use crate::scan::{PackageRef, ScanConfig, Vulnerability};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 一次查询的结果来源
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// 命中缓存，没有消耗配额
    Cached(Vec<Vulnerability>),
    /// 来自远程查询
    Fetched(Vec<Vulnerability>),
}

impl Lookup {
    pub fn is_remote(&self) -> bool {
        matches!(self, Lookup::Fetched(_))
    }

    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        match self {
            Lookup::Cached(v) | Lookup::Fetched(v) => v,
        }
    }

    pub fn into_vulnerabilities(self) -> Vec<Vulnerability> {
        match self {
            Lookup::Cached(v) | Lookup::Fetched(v) => v,
        }
    }
}

/// 对漏洞源的单次查询，不做重试（重试见 [`RemoteClient::lookup_with_retry`]）
pub struct RemoteClient {
    source: Arc<dyn VulnerabilitySource>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResultCache>,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(
        source: Arc<dyn VulnerabilitySource>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            source,
            limiter,
            cache,
            timeout: Duration::from_secs(30),
        }
    }

    /// 单次远程请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 查询一个包
    ///
    /// 缓存命中直接返回；否则向限流器申请名额，被拒绝时立即返回
    /// [`RemoteError::QuotaExceeded`]。请求没能发出时撤回占用的名额。
    pub async fn lookup(&self, package: &PackageRef, config: &ScanConfig) -> RemoteResult<Lookup> {
        let key = CacheKey::new(package, config);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(package = %package, "📦 命中缓存");
            return Ok(Lookup::Cached(hit));
        }

        let admission = self.limiter.admit();
        if !admission.allowed {
            return Err(RemoteError::QuotaExceeded {
                retry_after_secs: admission.retry_after_secs(),
            });
        }

        let result = match tokio::time::timeout(self.timeout, self.source.query(package)).await {
            Ok(r) => r,
            Err(_) => Err(RemoteError::Timeout),
        };

        match result {
            Ok(vulnerabilities) => {
                let vulnerabilities: Vec<Vulnerability> = vulnerabilities
                    .into_iter()
                    .filter(|v| config.include_unfixed || v.fixed_version.is_some())
                    .collect();
                self.cache.put(key, vulnerabilities.clone()).await;
                Ok(Lookup::Fetched(vulnerabilities))
            }
            Err(RemoteError::NotSent(msg)) => {
                if let Some(ticket) = admission.ticket() {
                    self.limiter.retract(ticket);
                }
                warn!(package = %package, error = %msg, "请求未发出，已归还配额");
                Err(RemoteError::NotSent(msg))
            }
            Err(e) => Err(e),
        }
    }
}
