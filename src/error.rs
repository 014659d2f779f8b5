use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttrError {
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Backend error: {0}")]
    Backend(#[source] rusqlite::Error),
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
    #[error("Unimplemented: {0}")]
    Unimplemented(&'static str),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AttrError>;

// Helper conversions
impl From<rusqlite::Error> for AttrError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::OutOfMemory) => Self::OutOfMemory(e.to_string()),
            _ => Self::Backend(e),
        }
    }
}
impl From<config::ConfigError> for AttrError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

// Errors travel back into SQLite through the virtual table callbacks.
// Backend errors are handed back untouched so the host reports them verbatim.
impl From<AttrError> for rusqlite::Error {
    fn from(e: AttrError) -> Self {
        match e {
            AttrError::Backend(inner) => inner,
            AttrError::OutOfMemory(message) => rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOMEM),
                Some(message),
            ),
            other => rusqlite::Error::ModuleError(other.to_string()),
        }
    }
}
