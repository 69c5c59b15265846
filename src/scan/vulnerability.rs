//! 漏洞记录

use serde::{Deserialize, Serialize};

/// 漏洞严重等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[serde(alias = "none", alias = "NONE")]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Unknown
    }
}

/// 漏洞源返回的单条漏洞
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub cve_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// CVSS 分数
    #[serde(default)]
    pub score: f32,
    /// CVSS 向量串
    #[serde(default)]
    pub vector: String,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub modified: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
}

impl Vulnerability {
    pub fn new(cve_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            cve_id: cve_id.into(),
            description: String::new(),
            severity,
            score: 0.0,
            vector: String::new(),
            published: String::new(),
            modified: String::new(),
            references: Vec::new(),
            affected_versions: Vec::new(),
            fixed_version: None,
        }
    }

    pub fn with_fix(mut self, version: impl Into<String>) -> Self {
        self.fixed_version = Some(version.into());
        self
    }
}

/// 单个包的扫描结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageResult {
    pub package_name: String,
    pub vulnerabilities: Vec<Vulnerability>,
}

impl PackageResult {
    pub fn new(package_name: impl Into<String>, vulnerabilities: Vec<Vulnerability>) -> Self {
        Self {
            package_name: package_name.into(),
            vulnerabilities,
        }
    }

    /// 查询失败时记录的空结果
    pub fn empty(package_name: impl Into<String>) -> Self {
        Self::new(package_name, Vec::new())
    }

    pub fn is_clean(&self) -> bool {
        self.vulnerabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_remote_record() {
        let raw = r#"{
            "cveId": "CVE-2020-8203",
            "description": "Prototype pollution in zipObjectDeep",
            "severity": "HIGH",
            "score": 7.4,
            "vector": "CVSS:3.1/AV:N/AC:H/PR:N/UI:N/S:U/C:N/I:H/A:H",
            "published": "2020-07-15T17:15:00Z",
            "modified": "2021-09-01T00:00:00Z",
            "references": ["https://github.com/lodash/lodash/issues/4874"],
            "affectedVersions": ["<4.17.19"],
            "fixedVersion": "4.17.19"
        }"#;
        let vuln: Vulnerability = serde_json::from_str(raw).unwrap();
        assert_eq!(vuln.cve_id, "CVE-2020-8203");
        assert_eq!(vuln.severity, Severity::High);
        assert_eq!(vuln.fixed_version.as_deref(), Some("4.17.19"));
    }

    #[test]
    fn test_sparse_record_uses_defaults() {
        let vuln: Vulnerability = serde_json::from_str(r#"{"cveId":"CVE-2024-0001"}"#).unwrap();
        assert_eq!(vuln.severity, Severity::Unknown);
        assert!(vuln.references.is_empty());
        assert!(vuln.fixed_version.is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unknown);
    }
}
