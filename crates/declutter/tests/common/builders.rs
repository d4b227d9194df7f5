//! Scripted generation services and notifiers for integration tests.
//!
//! Each double exposes just enough state to assert on: call counters,
//! delivered notes, or gates that hold a generation call open while the
//! test observes mid-flight state.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use declutter::generate::{
    GeneratedImage, GenerationError, ImageEditor, PlanGenerator, SpeechSynthesizer,
};
use declutter::job::{ImagePayload, TransformOptions};
use declutter::notify::{CompletionNote, Notifier, NotifyError};

/// Plan generator that returns a fixed text and counts invocations.
pub struct ScriptedPlan {
    text: String,
    calls: AtomicUsize,
}

impl ScriptedPlan {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanGenerator for ScriptedPlan {
    async fn analyze(
        &self,
        _image: &ImagePayload,
        _options: &TransformOptions,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Image editor that parks inside `edit` until the test opens the gate,
/// so mid-flight state can be observed deterministically.
pub struct GatedImage {
    entered: Semaphore,
    release: Semaphore,
}

impl GatedImage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Semaphore::new(0),
            release: Semaphore::new(0),
        })
    }

    /// Blocks until a generation call has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }

    /// Lets one parked generation call proceed.
    pub fn open(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl ImageEditor for GatedImage {
    async fn edit(
        &self,
        image: &ImagePayload,
        _plan: &str,
        _options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        self.entered.add_permits(1);
        self.release
            .acquire()
            .await
            .map_err(|_| GenerationError::InvalidResponse("gate closed".to_string()))?
            .forget();
        Ok(GeneratedImage {
            bytes: image.bytes.clone(),
            mime: image.mime.clone(),
        })
    }
}

/// Image editor that always fails with an upstream error.
pub struct FailingImage {
    message: String,
}

impl FailingImage {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl ImageEditor for FailingImage {
    async fn edit(
        &self,
        _image: &ImagePayload,
        _plan: &str,
        _options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        Err(GenerationError::Upstream {
            status: 500,
            message: self.message.clone(),
        })
    }
}

/// Image editor that fails its first call and succeeds afterwards.
pub struct FlakyImage {
    failed_once: AtomicBool,
}

impl FlakyImage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            failed_once: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ImageEditor for FlakyImage {
    async fn edit(
        &self,
        image: &ImagePayload,
        _plan: &str,
        _options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(GenerationError::Upstream {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(GeneratedImage {
            bytes: image.bytes.clone(),
            mime: image.mime.clone(),
        })
    }
}

/// Speech synthesizer that reports rate limiting on every call.
pub struct RateLimitedSpeech;

impl RateLimitedSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SpeechSynthesizer for RateLimitedSpeech {
    async fn synthesize(&self, _script: &str, _voice: &str) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::RateLimited { retry_after: None })
    }
}

/// Notifier that records every note it is asked to deliver.
pub struct CountingNotifier {
    delivered: Mutex<Vec<CompletionNote>>,
}

impl CountingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<CompletionNote> {
        self.delivered.lock().expect("notes lock").clone()
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, note: &CompletionNote) -> Result<(), NotifyError> {
        self.delivered.lock().expect("notes lock").push(note.clone());
        Ok(())
    }
}
