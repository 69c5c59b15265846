//! 查询结果缓存
//!
//! 命中缓存的包不占用远程配额。缓存 key 由包名、版本和扫描配置的策略标志组成，
//! 同一个包在不同配置下的结果互不覆盖。

use crate::scan::{PackageRef, ScanConfig, Vulnerability};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub version: String,
    pub flags: String,
}

impl CacheKey {
    pub fn new(package: &PackageRef, config: &ScanConfig) -> Self {
        Self {
            name: package.name.clone(),
            version: package.version.clone(),
            flags: config.policy_flags(),
        }
    }
}

/// 结果缓存接口，实现方可接入任意存储
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Vec<Vulnerability>>;
    async fn put(&self, key: CacheKey, vulnerabilities: Vec<Vulnerability>);
}

/// 进程内存缓存
#[derive(Default)]
pub struct InMemoryResultCache {
    data: RwLock<HashMap<CacheKey, Vec<Vulnerability>>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Option<Vec<Vulnerability>> {
        self.data.read().await.get(key).cloned()
    }

    async fn put(&self, key: CacheKey, vulnerabilities: Vec<Vulnerability>) {
        self.data.write().await.insert(key, vulnerabilities);
    }
}

/// 不缓存任何结果
pub struct NoopResultCache;

#[async_trait]
impl ResultCache for NoopResultCache {
    async fn get(&self, _key: &CacheKey) -> Option<Vec<Vulnerability>> {
        None
    }

    async fn put(&self, _key: CacheKey, _vulnerabilities: Vec<Vulnerability>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Severity;

    #[tokio::test]
    async fn test_key_separates_policies() {
        let cache = InMemoryResultCache::new();
        let pkg = PackageRef::new("lodash", "4.17.15");
        let balanced = CacheKey::new(&pkg, &ScanConfig::balanced());
        let quick = CacheKey::new(&pkg, &ScanConfig::quick());

        cache
            .put(balanced.clone(), vec![Vulnerability::new("CVE-2020-8203", Severity::High)])
            .await;

        assert_eq!(cache.get(&balanced).await.map(|v| v.len()), Some(1));
        assert!(cache.get(&quick).await.is_none(), "不同配置不应共享缓存");
        assert_eq!(cache.len().await, 1);
    }
}
