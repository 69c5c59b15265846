//! 滑动窗口限流器
//!
//! 记录最近一个窗口（默认 60 秒）内已放行请求的时间戳，数量达到配额后拒绝，
//! 并给出最早一条时间戳滑出窗口还需等待多久。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 一次准入判定的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// 被拒绝时距离下一个可用名额的时长；放行时为 0
    pub retry_after: Duration,
    ticket: Option<AdmissionTicket>,
}

impl Admission {
    /// 放行时记录的时间戳凭据，用于请求未发出时撤回
    pub fn ticket(&self) -> Option<AdmissionTicket> {
        self.ticket
    }

    /// `retry_after` 向上取整到秒，至少 1 秒
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let secs = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }
}

/// 已放行请求在窗口中的时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionTicket(Instant);

/// 滑动窗口限流器，可在多个任务间共享（内部加锁）
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self {
            quota: quota.max(1),
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(quota)),
        }
    }

    /// 每分钟 `quota` 次
    pub fn per_minute(quota: usize) -> Self {
        Self::new(quota, Duration::from_secs(60))
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// 判断当前能否发送请求；放行时立即占用一个名额
    pub fn admit(&self) -> Admission {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.prune(&mut timestamps, now);

        if timestamps.len() < self.quota {
            timestamps.push_back(now);
            return Admission {
                allowed: true,
                retry_after: Duration::ZERO,
                ticket: Some(AdmissionTicket(now)),
            };
        }

        let oldest = timestamps.front().copied().unwrap_or(now);
        let retry_after = self
            .window
            .saturating_sub(now.saturating_duration_since(oldest));
        debug!(
            in_window = timestamps.len(),
            retry_after_ms = retry_after.as_millis() as u64,
            "⏳ 限流拒绝"
        );
        Admission {
            allowed: false,
            retry_after,
            ticket: None,
        }
    }

    /// 撤回一次放行（请求没有真正发出时调用），返回是否找到对应时间戳
    pub fn retract(&self, ticket: AdmissionTicket) -> bool {
        let mut timestamps = self.lock();
        match timestamps.iter().rposition(|t| *t == ticket.0) {
            Some(index) => {
                timestamps.remove(index);
                true
            }
            None => false,
        }
    }

    /// 当前窗口内剩余名额
    pub fn remaining(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.prune(&mut timestamps, now);
        self.quota.saturating_sub(timestamps.len())
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = timestamps.front() {
            if now.saturating_duration_since(*front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // 临界区内没有会 panic 的操作，poisoned 时直接沿用内部数据
        self.timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_beyond_quota() {
        let limiter = RateLimiter::per_minute(10);

        let mut allowed = 0;
        let mut denied = Vec::new();
        for _ in 0..15 {
            tokio::time::advance(Duration::from_millis(50)).await;
            let admission = limiter.admit();
            if admission.allowed {
                allowed += 1;
            } else {
                denied.push(admission);
            }
        }

        assert_eq!(allowed, 10, "一秒内最多放行 10 次");
        assert_eq!(denied.len(), 5);
        assert!(denied.iter().all(|a| a.retry_after > Duration::ZERO));
        assert!(denied.iter().all(|a| a.ticket().is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_from_oldest() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.admit().allowed);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(limiter.admit().allowed);

        let denied = limiter.admit();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(40));
        assert_eq!(denied.retry_after_secs(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::per_minute(3);
        for _ in 0..3 {
            assert!(limiter.admit().allowed);
        }
        assert!(!limiter.admit().allowed);
        assert_eq!(limiter.remaining(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.remaining(), 3, "窗口滑过后名额全部恢复");
        assert!(limiter.admit().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retract_restores_capacity() {
        let limiter = RateLimiter::per_minute(1);
        let admission = limiter.admit();
        assert!(admission.allowed);
        assert!(!limiter.admit().allowed);

        assert!(limiter.retract(admission.ticket().unwrap()));
        assert!(limiter.admit().allowed, "撤回后应可再次放行");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retract_after_expiry_is_noop() {
        let limiter = RateLimiter::per_minute(1);
        let ticket = limiter.admit().ticket().unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.admit().allowed);
        assert!(!limiter.retract(ticket));
        assert_eq!(limiter.remaining(), 0);
    }
}
