//! Test harness for isolated test execution.
//!
//! `TestHarness` wires a full `TransformationService` against an
//! in-memory database and a temp-directory artifact store, with any of
//! the generation services or the notifier swappable for scripted
//! doubles.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tempfile::TempDir;

use declutter::db::{job_repo, Database};
use declutter::generate::{
    GenerationServices, ImageEditor, PlanGenerator, SpeechSynthesizer, StubGenerator,
};
use declutter::job::{JobRecord, JobView, TransformOptions};
use declutter::notify::{LogNotifier, Notifier};
use declutter::settings::{Settings, StaticSettings};
use declutter::storage::ArtifactStore;
use declutter::TransformationService;

/// A 1x1 PNG, small enough to inline and valid enough to decode.
const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

pub fn sample_png() -> Vec<u8> {
    BASE64.decode(TINY_PNG_B64).expect("valid base64")
}

pub struct TestHarness {
    temp_dir: TempDir,
    /// Artifact root on disk, for tests that manipulate stored files.
    pub root: PathBuf,
    pub db: Database,
    pub artifacts: Arc<ArtifactStore>,
    pub service: TransformationService,
}

pub struct HarnessBuilder {
    settings: Settings,
    plan: Option<Arc<dyn PlanGenerator>>,
    image: Option<Arc<dyn ImageEditor>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            plan: None,
            image: None,
            speech: None,
            notifier: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn plan(mut self, plan: Arc<dyn PlanGenerator>) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn image(mut self, image: Arc<dyn ImageEditor>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        let db = Database::open_in_memory().expect("Failed to open database");
        let artifacts = Arc::new(ArtifactStore::new(&root));

        let stub = Arc::new(StubGenerator::new());
        let services = GenerationServices {
            plan: self.plan.unwrap_or_else(|| stub.clone()),
            image: self.image.unwrap_or_else(|| stub.clone()),
            speech: self.speech.unwrap_or(stub),
        };
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier::new()));

        let service = TransformationService::new(
            db.clone(),
            artifacts.clone(),
            services,
            notifier,
            Arc::new(StaticSettings::new(self.settings)),
        );

        TestHarness {
            temp_dir,
            root,
            db,
            artifacts,
            service,
        }
    }
}

impl TestHarness {
    /// Harness with stub generation services and default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Submits the sample photo and returns the fresh job view.
    pub fn submit_sample(&self, options: TransformOptions) -> JobView {
        self.service
            .submit(sample_png(), options)
            .expect("Failed to submit sample photo")
    }

    /// Reads the raw record, bypassing the view projection.
    pub fn record(&self, id: &str) -> JobRecord {
        job_repo::find_by_id(&self.db, id)
            .expect("Failed to query record")
            .expect("Record should exist")
    }
}
