//! 远程漏洞查询
//!
//! 由内向外四层：
//!
//! | 组件 | 作用 |
//! |------|------|
//! | [`RateLimiter`] | 60 秒滑动窗口配额，决定能否立即发请求 |
//! | [`VulnerabilitySource`] | 实际的漏洞源（HTTP API 或 Mock） |
//! | [`RemoteClient`] | 缓存 → 限流 → 超时查询，单次不重试 |
//! | [`RetryPolicy`] | 配额等待 / 指数退避重试，可被取消 |

pub mod cache;
pub mod client;
pub mod rate_limiter;
pub mod retry;
pub mod source;

pub use cache::{CacheKey, InMemoryResultCache, NoopResultCache, ResultCache};
pub use client::{Lookup, RemoteClient};
pub use rate_limiter::{Admission, AdmissionTicket, RateLimiter};
pub use retry::{NoopRetryObserver, RetryObserver, RetryOutcome, RetryPolicy, RetryWait};
pub use source::{HttpVulnerabilitySource, VulnerabilitySource, parse_wait_hint};

use crate::error::RemoteError;

/// 远程查询专用的 Result
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
