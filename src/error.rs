use thiserror::Error;

#[derive(Error, Debug)]
pub enum DunnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Export is missing column: {0}")]
    MissingColumn(String),

    #[error("Bad export row: {0}")]
    BadRow(String),

    #[error("No open loans found in export")]
    NoLoans,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DunnError>;
