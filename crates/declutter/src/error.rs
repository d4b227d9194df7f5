use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeclutterError {
    #[error("Transformation not found: {0}")]
    NotFound(String),

    #[error("Transformation {0} is still processing; retry applies to finished jobs only")]
    StillProcessing(String),

    #[error("Source image for {id} is unavailable (reference '{reference}')")]
    SourceUnavailable { id: String, reference: String },

    #[error("Invalid image upload: {0}")]
    InvalidImage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Artifact store error: {0}")]
    Storage(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Missing API credential: set DECLUTTER_API_KEY or DECLUTTER_API_KEY_FILE")]
    MissingCredential,

    #[error(
        "Could not determine a home directory; set DECLUTTER_DATABASE_PATH and DECLUTTER_ARTIFACT_ROOT"
    )]
    NoHomeDirectory,

    #[error("Failed to read credential file '{path}': {source}")]
    ReadCredential {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("Artifact not found: {0}")]
    Missing(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact '{path}': {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact '{path}': {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DeclutterError>;
