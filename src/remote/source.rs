//! 远程漏洞源
//!
//! [`VulnerabilitySource`] 是对漏洞库的最小抽象：给一个包，返回它受影响的漏洞。
//! [`HttpVulnerabilitySource`] 通过 HTTP API 查询；测试时可换成
//! [`MockVulnerabilitySource`](crate::testing::MockVulnerabilitySource)。

use crate::config::ScannerConfig;
use crate::error::{RemoteError, Result};
use crate::remote::RemoteResult;
use crate::scan::{PackageRef, Vulnerability};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// 无法解析等待提示时使用的默认等待秒数
pub const DEFAULT_WAIT_SECS: u64 = 30;

/// 漏洞源查询接口
#[async_trait]
pub trait VulnerabilitySource: Send + Sync {
    async fn query(&self, package: &PackageRef) -> RemoteResult<Vec<Vulnerability>>;
}

/// 基于 HTTP API 的漏洞源
///
/// 请求：`GET {base_url}/vulnerabilities?package=<name>&version=<version>`
///
/// 响应可以是漏洞数组，也可以是 `{"vulnerabilities": [...]}`。
/// 配额耗尽时服务端返回 429，或在错误信息中带上 "please wait N seconds" 之类的提示。
pub struct HttpVulnerabilitySource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    List(Vec<Vulnerability>),
    Wrapped { vulnerabilities: Vec<Vulnerability> },
}

impl HttpVulnerabilitySource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
            config.request_timeout(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/vulnerabilities", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VulnerabilitySource for HttpVulnerabilitySource {
    async fn query(&self, package: &PackageRef) -> RemoteResult<Vec<Vulnerability>> {
        let mut builder = self.client.get(self.endpoint()).query(&[
            ("package", package.name.as_str()),
            ("version", package.version.as_str()),
        ]);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_header = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_header, &body));
        }

        let parsed = response
            .json::<LookupResponse>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let vulnerabilities = match parsed {
            LookupResponse::List(list) => list,
            LookupResponse::Wrapped { vulnerabilities } => vulnerabilities,
        };
        debug!(package = %package, count = vulnerabilities.len(), "漏洞源返回");
        Ok(vulnerabilities)
    }
}

fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// 把非 2xx 响应映射为 [`RemoteError`]
pub(crate) fn classify_failure(
    status: StatusCode,
    retry_header: Option<u64>,
    body: &str,
) -> RemoteError {
    let lower = body.to_lowercase();
    let quota_hint = lower.contains("rate limit") || lower.contains("quota");
    if status == StatusCode::TOO_MANY_REQUESTS || quota_hint {
        let retry_after_secs = retry_header
            .or_else(|| parse_wait_hint(body))
            .unwrap_or(DEFAULT_WAIT_SECS);
        return RemoteError::QuotaExceeded { retry_after_secs };
    }
    RemoteError::ApiError {
        status: status.as_u16(),
        message: if body.is_empty() {
            status.to_string()
        } else {
            body.to_string()
        },
    }
}

/// 从 "wait N seconds" 形式的提示中取出 N
///
/// 也接受 "wait for N seconds"、"wait N sec"、"wait Ns"。找不到时返回 `None`。
pub fn parse_wait_hint(message: &str) -> Option<u64> {
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for (i, word) in words.iter().enumerate() {
        if *word != "wait" {
            continue;
        }
        let mut rest = words[i + 1..].iter();
        let mut next = rest.next();
        if next == Some(&"for") {
            next = rest.next();
        }
        let Some(token) = next else {
            continue;
        };

        // "30s" 这种数字和单位连写的情况
        let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let suffix = &token[digits.len()..];
        let unit = if suffix.is_empty() {
            rest.next().copied().unwrap_or("")
        } else {
            suffix
        };
        if (unit.starts_with("sec") || unit == "s")
            && let Ok(secs) = digits.parse()
        {
            return Some(secs);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wait_hint_variants() {
        assert_eq!(
            parse_wait_hint("Rate limit exceeded. Please wait 12 seconds before retrying."),
            Some(12)
        );
        assert_eq!(parse_wait_hint("quota hit, wait for 5 sec"), Some(5));
        assert_eq!(parse_wait_hint("WAIT 45s"), Some(45));
        assert_eq!(parse_wait_hint("wait 1 second"), Some(1));
    }

    #[test]
    fn test_parse_wait_hint_unparseable() {
        assert_eq!(parse_wait_hint("Rate limit exceeded, try again later"), None);
        assert_eq!(parse_wait_hint("wait a moment"), None);
        assert_eq!(parse_wait_hint("wait 3 minutes"), None);
        assert_eq!(parse_wait_hint(""), None);
    }

    #[test]
    fn test_classify_429_defaults_to_30s() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, None, "slow down");
        assert_eq!(err, RemoteError::QuotaExceeded { retry_after_secs: 30 });
    }

    #[test]
    fn test_classify_quota_message_in_403() {
        let err = classify_failure(
            StatusCode::FORBIDDEN,
            None,
            r#"{"error":"API quota exceeded, please wait 7 seconds"}"#,
        );
        assert_eq!(err, RemoteError::QuotaExceeded { retry_after_secs: 7 });
    }

    #[test]
    fn test_classify_prefers_retry_after_header() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, Some(9), "wait 20 seconds");
        assert_eq!(err, RemoteError::QuotaExceeded { retry_after_secs: 9 });
    }

    #[test]
    fn test_classify_server_error() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, None, "");
        match err {
            RemoteError::ApiError { status, .. } => assert_eq!(status, 502),
            other => panic!("应该是 ApiError，实际: {:?}", other),
        }
        assert!(err_is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!err_is_retryable(StatusCode::NOT_FOUND));
    }

    fn err_is_retryable(status: StatusCode) -> bool {
        classify_failure(status, None, "boom").is_retryable()
    }
}
