use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("transfer of {url} failed after {attempts} attempts: {last_error}")]
    Transfer {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("archive {path} could not be read: {message}")]
    Archive { path: String, message: String },

    #[error("no matching link found for: {0}")]
    LinkNotFound(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("no tabular data extracted from {0}")]
    EmptyExtraction(String),

    #[error("table extraction failed: {0}")]
    Extraction(String),

    #[error("load failed: {0}")]
    Load(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
