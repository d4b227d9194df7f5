//! Deterministic in-process generation.
//!
//! The default backend when no API credential is configured, and what
//! the test suite runs against. Plans come from a fixed step table
//! keyed by creativity level, the "after" image is the source photo
//! passed through, and audio is a stable byte stand-in.

use async_trait::async_trait;

use crate::job::{CreativityLevel, ImagePayload, TransformOptions};

use super::{GeneratedImage, GenerationError, ImageEditor, PlanGenerator, SpeechSynthesizer};

/// Steps every stub plan opens with, regardless of creativity level.
const BASE_STEPS: &[&str] = &[
    "Pick up loose items from the floor and sort them into keep, donate, and discard piles",
    "Clear flat surfaces, leaving no more than three everyday items on each",
    "Return stray dishes, clothing, and papers to the rooms they belong in",
];

const STRICT_STEPS: &[&str] = &[
    "Wipe down the cleared surfaces without moving any furniture",
];

const BALANCED_STEPS: &[&str] = &[
    "Angle frequently used furniture toward the door to open up the walkway",
    "Group remaining decor into one or two small clusters per surface",
];

const CREATIVE_STEPS: &[&str] = &[
    "Rearrange the largest furniture piece against the longest wall",
    "Restyle shelves with the fewest, most loved objects front and center",
    "Relocate one lamp to the darkest corner of the room",
];

/// First bytes of the stand-in narration audio (an MPEG audio sync word),
/// so stored stubs are recognizable as the fake they are.
const STUB_AUDIO_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

/// Generator that produces the same output for the same input, with no
/// network access.
pub struct StubGenerator;

impl StubGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn build_plan(options: &TransformOptions) -> String {
    let extra: &[&str] = match options.creativity_level {
        CreativityLevel::Strict => STRICT_STEPS,
        CreativityLevel::Balanced => BALANCED_STEPS,
        CreativityLevel::Creative => CREATIVE_STEPS,
    };

    let mut steps: Vec<String> = BASE_STEPS
        .iter()
        .chain(extra)
        .map(|s| (*s).to_string())
        .collect();

    if let Some(keep) = options.keep_items.as_deref() {
        let keep = keep.trim();
        if !keep.is_empty() {
            steps.push(format!("Leave {keep} exactly where they are"));
        }
    }

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}.", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl PlanGenerator for StubGenerator {
    async fn analyze(
        &self,
        _image: &ImagePayload,
        options: &TransformOptions,
    ) -> Result<String, GenerationError> {
        Ok(build_plan(options))
    }
}

#[async_trait]
impl ImageEditor for StubGenerator {
    /// The stub's "after" image is the source photo unchanged.
    async fn edit(
        &self,
        image: &ImagePayload,
        _plan: &str,
        _options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        Ok(GeneratedImage {
            bytes: image.bytes.clone(),
            mime: image.mime.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for StubGenerator {
    /// Not playable audio; a deterministic header plus the script bytes,
    /// enough for storage and wiring to be exercised end to end.
    async fn synthesize(&self, script: &str, _voice: &str) -> Result<Vec<u8>, GenerationError> {
        let mut bytes = STUB_AUDIO_HEADER.to_vec();
        bytes.extend_from_slice(script.as_bytes());
        Ok(bytes)
    }
}
