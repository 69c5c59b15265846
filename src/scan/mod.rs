//! 扫描数据模型
//!
//! 调用方提交的包清单（[`PackageRef`]）、扫描配置（[`ScanConfig`]），
//! 以及漏洞源返回的结果（[`Vulnerability`] / [`PackageResult`]）。

mod package;
mod vulnerability;

pub use package::{DependencyKind, PackageRef, ScanConfig};
pub use vulnerability::{PackageResult, Severity, Vulnerability};
