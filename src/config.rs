//! 扫描器配置加载
//!
//! 三种来源，按需组合：
//!
//! - [`ScannerConfig::default`]：内置默认值
//! - [`ScannerConfig::load`]：YAML 文件，缺省字段回落到默认值
//! - [`ScannerConfig::from_env`]：环境变量（支持 `.env`），格式：
//!
//! ```text
//! DEPSCAN_API_BASE_URL=https://vulndb.example.com/api/v1
//! DEPSCAN_API_KEY=...
//! DEPSCAN_REQUESTS_PER_MINUTE=10
//! DEPSCAN_STATE_PATH=~/.depscan/tasks.json
//! ```

use crate::error::{ConfigError, Result, ScanError};
use crate::notify::NotificationPreferences;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "DEPSCAN_";

/// 扫描引擎的运行时配置
///
/// 时长字段以秒为单位存储，便于 YAML / 环境变量书写；通过同名方法取 [`Duration`]。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// 漏洞库 API 地址
    pub api_base_url: String,
    pub api_key: Option<String>,
    /// 远程 API 每分钟请求配额
    pub requests_per_minute: usize,
    /// 单个包的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 无法解析服务端等待提示时的默认等待（秒）
    pub default_retry_wait_secs: u64,
    /// 非配额类远程错误的首次退避（秒），每次翻倍
    pub error_backoff_secs: u64,
    /// 相邻两次远程查询之间的固定间隔（毫秒）
    pub inter_package_delay_ms: u64,
    /// 单次远程请求超时（秒）
    pub request_timeout_secs: u64,
    /// 历史任务保留上限
    pub history_capacity: usize,
    /// 任务过期时长（小时）
    pub task_max_age_hours: u64,
    /// 过期清理周期（分钟）
    pub sweep_interval_minutes: u64,
    /// 任务状态文件路径
    pub state_path: String,
    pub notifications: NotificationPreferences,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/v1".to_string(),
            api_key: None,
            requests_per_minute: 10,
            max_attempts: 3,
            default_retry_wait_secs: 30,
            error_backoff_secs: 2,
            inter_package_delay_ms: 6_000,
            request_timeout_secs: 30,
            history_capacity: 10,
            task_max_age_hours: 24,
            sweep_interval_minutes: 60,
            state_path: "~/.depscan/tasks.json".to_string(),
            notifications: NotificationPreferences::default(),
        }
    }
}

impl ScannerConfig {
    /// 从 YAML 文件加载
    pub fn load(path: &str) -> Result<Self> {
        let file =
            std::fs::File::open(path).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: ScannerConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载，未设置的字段使用默认值
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let mut config = Self::default();

        for (key, value) in std::env::vars() {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field.to_lowercase().as_str() {
                "api_base_url" => config.api_base_url = value,
                "api_key" => config.api_key = Some(value),
                "requests_per_minute" => {
                    config.requests_per_minute = parse_env(&key, &value)?;
                }
                "max_attempts" => config.max_attempts = parse_env(&key, &value)?,
                "default_retry_wait_secs" => {
                    config.default_retry_wait_secs = parse_env(&key, &value)?;
                }
                "error_backoff_secs" => config.error_backoff_secs = parse_env(&key, &value)?,
                "inter_package_delay_ms" => {
                    config.inter_package_delay_ms = parse_env(&key, &value)?;
                }
                "request_timeout_secs" => {
                    config.request_timeout_secs = parse_env(&key, &value)?;
                }
                "history_capacity" => config.history_capacity = parse_env(&key, &value)?,
                "task_max_age_hours" => config.task_max_age_hours = parse_env(&key, &value)?,
                "sweep_interval_minutes" => {
                    config.sweep_interval_minutes = parse_env(&key, &value)?;
                }
                "state_path" => config.state_path = value,
                "notify_completed" => {
                    config.notifications.task_completed = parse_env(&key, &value)?;
                }
                "notify_failed" => config.notifications.task_failed = parse_env(&key, &value)?,
                // 其他 DEPSCAN_ 前缀变量（如 RUST_LOG 替代项）交给调用方处理
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("requests_per_minute", self.requests_per_minute == 0),
            ("max_attempts", self.max_attempts == 0),
            ("history_capacity", self.history_capacity == 0),
            ("sweep_interval_minutes", self.sweep_interval_minutes == 0),
        ];
        for (field, invalid) in checks {
            if invalid {
                return Err(ScanError::Config(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                }));
            }
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("api_base_url".to_string()).into());
        }
        Ok(())
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn requests_per_minute(mut self, quota: usize) -> Self {
        self.requests_per_minute = quota;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn inter_package_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_package_delay_ms = delay_ms;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = path.into();
        self
    }

    pub fn notifications(mut self, prefs: NotificationPreferences) -> Self {
        self.notifications = prefs;
        self
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(60)
    }

    pub fn default_retry_wait(&self) -> Duration {
        Duration::from_secs(self.default_retry_wait_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn inter_package_delay(&self) -> Duration {
        Duration::from_millis(self.inter_package_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_max_age(&self) -> Duration {
        Duration::from_secs(self.task_max_age_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.saturating_mul(60))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ScanError::Config(ConfigError::InvalidValue {
            field: key.to_string(),
            message: format!("cannot parse '{}'", value),
        })
    })
}
