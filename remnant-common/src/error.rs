use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RemnantError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Alias Database Error: {0}")]
    AliasDb(String),

    #[error("Scan Error: {0}")]
    Scan(String),

    #[error("Report Error: {0}")]
    Report(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(&'static str, String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl From<std::io::Error> for RemnantError {
    fn from(err: std::io::Error) -> Self {
        RemnantError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for RemnantError {
    fn from(err: serde_json::Error) -> Self {
        RemnantError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for RemnantError {
    fn from(err: toml::de::Error) -> Self {
        RemnantError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RemnantError>;
