use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DiliError {
    #[error("invalid ChEMBL id: {0}")]
    InvalidChemblId(String),

    #[error("invalid InChI key: {0}")]
    InvalidInchiKey(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("ChEMBL request failed: {0}")]
    ChemblHttp(String),

    #[error("imaging request failed: {0}")]
    ImagingHttp(String),

    #[error("imaging service returned status {status}: {message}")]
    ImagingStatus { status: u16, message: String },

    #[error("inference request failed: {0}")]
    ModelHttp(String),

    #[error("inference service returned status {status}: {message}")]
    ModelStatus { status: u16, message: String },

    #[error("unexpected response shape from {source_name}: {message}")]
    Schema {
        source_name: String,
        message: String,
    },

    #[error("reference spreadsheet not found: {0}")]
    ReferenceNotFound(PathBuf),

    #[error("failed to read reference spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("npy error: {0}")]
    Npy(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("invalid image dataset: {0}")]
    Dataset(String),

    #[error("model output has shape {found:?}, expected ({rows}, {features})")]
    ModelOutput {
        rows: usize,
        features: usize,
        found: Vec<usize>,
    },

    #[error("input not found: {0}")]
    InputNotFound(String),
}

impl From<rusqlite::Error> for DiliError {
    fn from(err: rusqlite::Error) -> Self {
        DiliError::Database(err.to_string())
    }
}

impl From<csv::Error> for DiliError {
    fn from(err: csv::Error) -> Self {
        DiliError::Csv(err.to_string())
    }
}
