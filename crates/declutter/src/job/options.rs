//! User-supplied generation parameters captured at submission time.

use serde::{Deserialize, Serialize};

/// How aggressively the plan and after-image may rework the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreativityLevel {
    /// Remove clutter only; furniture and layout stay untouched.
    Strict,
    /// Tidy up and allow small rearrangements.
    #[default]
    Balanced,
    /// Free to restyle the room as long as its function is preserved.
    Creative,
}

impl CreativityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreativityLevel::Strict => "strict",
            CreativityLevel::Balanced => "balanced",
            CreativityLevel::Creative => "creative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(CreativityLevel::Strict),
            "balanced" => Some(CreativityLevel::Balanced),
            "creative" => Some(CreativityLevel::Creative),
            _ => None,
        }
    }

    /// Guidance sentence injected into generation prompts.
    pub fn guidance(&self) -> &'static str {
        match self {
            CreativityLevel::Strict => {
                "Only remove clutter. Do not move furniture or change the room layout."
            }
            CreativityLevel::Balanced => {
                "Remove clutter and make small rearrangements where they clearly help."
            }
            CreativityLevel::Creative => {
                "Feel free to restyle the room, as long as it stays recognizable and functional."
            }
        }
    }
}

/// Options the user attached to a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOptions {
    pub creativity_level: CreativityLevel,
    /// Free-text list of items that must stay in the room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_items: Option<String>,
    /// Name used to personalize narration and the completion message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Notification address; doubles as the owner id for listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}
