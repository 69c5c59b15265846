//! 包引用与扫描配置

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 依赖类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// 直接依赖
    #[default]
    Direct,
    /// 开发依赖
    Dev,
    /// 传递依赖
    Transitive,
}

/// 待扫描的包（名称 + 版本），挂到任务上之后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub kind: DependencyKind,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: DependencyKind::Direct,
        }
    }

    pub fn with_kind(mut self, kind: DependencyKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// 解析 `name@version`，支持 `@scope/name@version` 形式的作用域包名
impl FromStr for PackageRef {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.rsplit_once('@') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(ScanError::Other(format!(
                "无法解析包 `{s}`，应为 name@version"
            ))),
        }
    }
}

/// 扫描配置：创建任务时选定的具名配置包，之后不可变
///
/// 编排器只负责保存和回显；`include_*` 标志参与结果缓存的 key。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub name: String,
    pub include_dev: bool,
    pub include_transitive: bool,
    /// 是否包含尚无修复版本的漏洞
    pub include_unfixed: bool,
}

impl ScanConfig {
    /// 只扫直接依赖
    pub fn quick() -> Self {
        Self {
            name: "quick".to_string(),
            include_dev: false,
            include_transitive: false,
            include_unfixed: false,
        }
    }

    pub fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            include_dev: false,
            include_transitive: true,
            include_unfixed: true,
        }
    }

    /// 全部依赖类型
    pub fn thorough() -> Self {
        Self {
            name: "thorough".to_string(),
            include_dev: true,
            include_transitive: true,
            include_unfixed: true,
        }
    }

    /// 按名称取预设配置，未知名称返回 `None`
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "quick" => Some(Self::quick()),
            "balanced" => Some(Self::balanced()),
            "thorough" => Some(Self::thorough()),
            _ => None,
        }
    }

    /// 该配置是否包含指定包
    pub fn accepts(&self, package: &PackageRef) -> bool {
        match package.kind {
            DependencyKind::Direct => true,
            DependencyKind::Dev => self.include_dev,
            DependencyKind::Transitive => self.include_transitive,
        }
    }

    /// 参与缓存 key 的策略标志
    pub fn policy_flags(&self) -> String {
        format!(
            "dev={};transitive={};unfixed={}",
            self.include_dev, self.include_transitive, self.include_unfixed
        )
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::balanced()
    }
}
