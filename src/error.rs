use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch failed for {endpoint}: HTTP {status}")]
    FetchStatus { endpoint: String, status: u16 },

    #[error("{entity} {id} not found in the loaded catalogue")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl AppError {
    /// Network failures and non-2xx responses are both fetch errors.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, AppError::Http(_) | AppError::FetchStatus { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
