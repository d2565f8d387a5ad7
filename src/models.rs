//! Wire types for OpenAI-compatible chat-completions stream chunks.
//!
//! Only the fields the pipeline reads are typed; everything else is kept in
//! flattened maps so a rewritten event serializes with its original data.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Finish reason that marks a normal end of the answer.
pub const FINISH_STOP: &str = "stop";

/// One parsed `data:` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    /// Absent (`None`) and `null` (`Some(None)`) are kept apart so a
    /// rewritten chunk still carries `"finish_reason": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub finish_reason: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Incremental message fragment.
///
/// `content` and `reasoning_content` distinguish an absent key (`None`)
/// from an explicit `null` (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_content: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl StreamEvent {
    /// An event carrying a single choice whose delta holds `content`.
    #[must_use]
    pub fn content_only(content: impl Into<String>) -> Self {
        Self {
            choices: Some(vec![Choice {
                delta: Some(Delta::with_content(content)),
                finish_reason: None,
                extra: Map::new(),
            }]),
            citations: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.as_ref().and_then(|choices| choices.first())
    }

    /// Text content of the first choice's delta, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.first_choice()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(Delta::text)
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.first_choice()
            .and_then(|choice| choice.finish_reason.as_ref())
            .and_then(Option::as_deref)
    }
}

impl Delta {
    #[must_use]
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(Some(content.into())),
            reasoning_content: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Option::as_deref)
    }

    /// Non-empty reasoning text, if the delta carries any.
    #[must_use]
    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning_content
            .as_ref()
            .and_then(Option::as_deref)
            .filter(|text| !text.is_empty())
    }
}
