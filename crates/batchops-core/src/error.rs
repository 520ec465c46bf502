use std::fmt;

/// Main error type for batchops
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// Key/value store errors (queue, schedule registry)
    Kv(crate::kv::KvError),

    /// File storage errors
    Storage(String),

    /// Malformed cron schedule
    Schedule(String),

    /// Callable resolution or invocation errors
    Callable(String),

    /// Validation errors
    Validation(String),

    /// Not found errors
    NotFound(String),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Kv(e) => write!(f, "Key/value store error: {}", e),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Schedule(msg) => write!(f, "Malformed schedule: {}", msg),
            Error::Callable(msg) => write!(f, "Callable error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Kv(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<crate::kv::KvError> for Error {
    fn from(error: crate::kv::KvError) -> Self {
        Error::Kv(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new schedule error
    pub fn schedule<T: Into<String>>(msg: T) -> Self {
        Error::Schedule(msg.into())
    }

    /// Create a new callable error
    pub fn callable<T: Into<String>>(msg: T) -> Self {
        Error::Callable(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }
}

impl Error {
    /// Whether the error is worth retrying at the call site
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Kv(_) | Error::Io(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Kv(_) => "kv",
            Error::Storage(_) => "storage",
            Error::Schedule(_) => "schedule",
            Error::Callable(_) => "callable",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}
