use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transformation not found: {0}")]
    NotFound(String),

    #[error("Database failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Artifact store failed: {0}")]
    Artifacts(#[from] crate::error::StoreError),

    #[error("Generation failed: {0}")]
    Generation(#[from] crate::generate::GenerationError),
}
