use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibanError {
    Configuration(String),
    StorageConnection(String),
    StorageOperation(String),
    Serialization(String),
    MalformedInput(String),
    Validation(String),
    FileOperation(String),
}

impl CalibanError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            CalibanError::Configuration(_) => "E001",
            CalibanError::StorageConnection(_) => "E002",
            CalibanError::StorageOperation(_) => "E003",
            CalibanError::Serialization(_) => "E004",
            CalibanError::MalformedInput(_) => "E005",
            CalibanError::Validation(_) => "E006",
            CalibanError::FileOperation(_) => "E007",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            CalibanError::Configuration(_) => "Configuration Error",
            CalibanError::StorageConnection(_) => "Storage Connection Error",
            CalibanError::StorageOperation(_) => "Storage Operation Error",
            CalibanError::Serialization(_) => "Serialization Error",
            CalibanError::MalformedInput(_) => "Malformed Input",
            CalibanError::Validation(_) => "Validation Error",
            CalibanError::FileOperation(_) => "File Operation Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            CalibanError::Configuration(msg) => msg,
            CalibanError::StorageConnection(msg) => msg,
            CalibanError::StorageOperation(msg) => msg,
            CalibanError::Serialization(msg) => msg,
            CalibanError::MalformedInput(msg) => msg,
            CalibanError::Validation(msg) => msg,
            CalibanError::FileOperation(msg) => msg,
        }
    }

    /// 存储层的临时故障：读取时按空会话处理，写入时返回 false
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CalibanError::StorageConnection(_) | CalibanError::StorageOperation(_)
        )
    }

    /// 格式化为彩色输出（用于启动失败）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出（用于日志和响应头）
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for CalibanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for CalibanError {}

// 便捷的构造函数
impl CalibanError {
    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        CalibanError::Configuration(msg.into())
    }

    pub fn storage_connection<T: Into<String>>(msg: T) -> Self {
        CalibanError::StorageConnection(msg.into())
    }

    pub fn storage_operation<T: Into<String>>(msg: T) -> Self {
        CalibanError::StorageOperation(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        CalibanError::Serialization(msg.into())
    }

    pub fn malformed_input<T: Into<String>>(msg: T) -> Self {
        CalibanError::MalformedInput(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        CalibanError::Validation(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        CalibanError::FileOperation(msg.into())
    }
}

impl From<redis::RedisError> for CalibanError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            CalibanError::StorageConnection(err.to_string())
        } else {
            CalibanError::StorageOperation(err.to_string())
        }
    }
}

impl From<std::io::Error> for CalibanError {
    fn from(err: std::io::Error) -> Self {
        CalibanError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for CalibanError {
    fn from(err: serde_json::Error) -> Self {
        CalibanError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CalibanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            CalibanError::configuration("a"),
            CalibanError::storage_connection("b"),
            CalibanError::storage_operation("c"),
            CalibanError::serialization("d"),
            CalibanError::malformed_input("e"),
            CalibanError::validation("f"),
            CalibanError::file_operation("g"),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_transient_classification() {
        assert!(CalibanError::storage_connection("refused").is_transient());
        assert!(CalibanError::storage_operation("WRONGTYPE").is_transient());
        assert!(!CalibanError::configuration("missing url").is_transient());
        assert!(!CalibanError::validation("ttl").is_transient());
    }

    #[test]
    fn test_format_simple() {
        let err = CalibanError::validation("ttl must be positive");
        assert_eq!(err.format_simple(), "Validation Error: ttl must be positive");
        assert_eq!(err.to_string(), err.format_simple());
    }
}
