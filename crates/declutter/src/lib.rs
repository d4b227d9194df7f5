pub mod db;
pub mod error;
pub mod generate;
pub mod job;
pub mod notify;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod settings;
pub mod storage;
pub mod telemetry;

pub use db::{Database, DatabaseError, JobFilter};
pub use error::{ConfigError, DeclutterError, Result, StoreError};
pub use generate::{
    GeneratedImage, GenerationError, GenerationServices, ImageEditor, OpenAiClient, PlanGenerator,
    RetryPolicy, SpeechSynthesizer, StubGenerator,
};
pub use job::{
    CachePolicy, CreativityLevel, ImagePayload, JobRecord, JobStatus, JobView, TransformOptions,
};
pub use notify::{CompletionNote, LogNotifier, Notifier, NotifyError};
pub use pipeline::{narration_script, Disposition, Pipeline, PipelineError, ProcessOutcome};
pub use service::TransformationService;
pub use settings::{EnvSettings, GenerationBackend, Settings, SettingsProvider, StaticSettings};
pub use storage::ArtifactStore;
