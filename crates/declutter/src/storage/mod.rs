//! Durable key→blob storage for generated artifacts.

mod artifacts;

pub use artifacts::{extension_for_mime, ArtifactStore};
