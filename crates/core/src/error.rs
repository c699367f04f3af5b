use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Missing credentials: {0}")]
    Credentials(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Run-level failures abort the whole invocation; everything else is
    /// contained to the candidate that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::Browser(_) | Error::Credentials(_) | Error::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
