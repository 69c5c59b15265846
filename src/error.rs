use std::fmt;

/// depscan 的统一错误类型
#[derive(Debug)]
pub enum ScanError {
    /// 远程漏洞源相关错误
    Remote(RemoteError),
    /// 任务状态持久化错误
    Persistence(PersistenceError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 远程漏洞源错误
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// 超出请求配额，需等待 `retry_after_secs` 秒
    QuotaExceeded { retry_after_secs: u64 },
    /// 请求未能发出（连接失败等），不占用配额
    NotSent(String),
    /// 网络请求失败
    Network(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 请求超时
    Timeout,
}

/// 持久化错误
#[derive(Debug)]
pub enum PersistenceError {
    IoError(String),
    SerializationError(String),
    /// 存储文件的 schema 版本与当前不一致
    SchemaMismatch { found: u32, expected: u32 },
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 缺少必需的配置项
    MissingField(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl RemoteError {
    /// 是否为配额耗尽
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, RemoteError::QuotaExceeded { .. })
    }

    /// 是否值得用重试预算再试一次
    ///
    /// 包不存在（404）、请求本身有误（400/422）以及响应无法解析时，重试结果不会改变。
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::ApiError { status, .. } => !matches!(status, 400 | 404 | 422),
            RemoteError::InvalidResponse(_) => false,
            _ => true,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Remote(e) => write!(f, "Remote Error: {}", e),
            ScanError::Persistence(e) => write!(f, "Persistence Error: {}", e),
            ScanError::Config(e) => write!(f, "Config Error: {}", e),
            ScanError::Io(e) => write!(f, "IO Error: {}", e),
            ScanError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::QuotaExceeded { retry_after_secs } => {
                write!(f, "Quota exceeded, wait {} seconds", retry_after_secs)
            }
            RemoteError::NotSent(msg) => write!(f, "Request not sent: {}", msg),
            RemoteError::Network(msg) => write!(f, "Network error: {}", msg),
            RemoteError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            RemoteError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            RemoteError::Timeout => write!(f, "Request timeout"),
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::IoError(msg) => write!(f, "IO error: {}", msg),
            PersistenceError::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            PersistenceError::SchemaMismatch { found, expected } => {
                write!(f, "Schema version {} does not match {}", found, expected)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing config field: {}", field),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for RemoteError {}
impl std::error::Error for PersistenceError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Io(err)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() || err.is_builder() {
            RemoteError::NotSent(err.to_string())
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        ScanError::Remote(err.into())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Persistence(PersistenceError::SerializationError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(err: serde_yaml::Error) -> Self {
        ScanError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<RemoteError> for ScanError {
    fn from(err: RemoteError) -> Self {
        ScanError::Remote(err)
    }
}

impl From<PersistenceError> for ScanError {
    fn from(err: PersistenceError) -> Self {
        ScanError::Persistence(err)
    }
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        ScanError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, ScanError>;
