//! Per-token delay model.

use std::time::Duration;

use super::config::PacerConfig;
use super::tokenizer::{Token, TokenCategory, tokenize};

/// Floor applied to every token delay.
pub const MIN_TOKEN_DELAY: Duration = Duration::from_millis(10);

/// How long an idle loop waits before re-checking for work.
pub const IDLE_POLL: Duration = Duration::from_millis(16);

#[must_use]
pub fn category_multiplier(category: TokenCategory, config: &PacerConfig) -> f64 {
    match category {
        TokenCategory::Ideographic => config.script_speed_factor,
        TokenCategory::Latin => 1.2,
        TokenCategory::CodeFence => 0.7,
        TokenCategory::Punctuation => 1.5,
        TokenCategory::Whitespace => 3.0,
    }
}

/// Speed-up applied when a backlog builds, slow-down when nearly drained.
#[must_use]
pub fn queue_multiplier(queued_chars: usize) -> f64 {
    match queued_chars {
        n if n > 500 => 2.0,
        n if n > 200 => 1.5,
        n if n < 20 => 0.8,
        _ => 1.0,
    }
}

/// Effective emission speed in characters per second.
#[must_use]
pub fn chars_per_second(category: TokenCategory, queued_chars: usize, config: &PacerConfig) -> f64 {
    let raw =
        config.base_speed * category_multiplier(category, config) * queue_multiplier(queued_chars);
    raw.clamp(config.min_speed, config.max_speed)
}

/// Delay to wait after emitting a token of `chars` characters.
#[must_use]
pub fn token_delay(
    chars: usize,
    category: TokenCategory,
    queued_chars: usize,
    config: &PacerConfig,
) -> Duration {
    let speed = chars_per_second(category, queued_chars, config);
    let seconds = chars as f64 / speed;
    if !seconds.is_finite() {
        return MIN_TOKEN_DELAY;
    }
    Duration::from_secs_f64(seconds).max(MIN_TOKEN_DELAY)
}

/// Tokenize `text` and attach delays, given `backlog` characters already
/// waiting ahead of it.
#[must_use]
pub fn schedule(text: &str, backlog: usize, config: &PacerConfig) -> Vec<Token> {
    let queued = backlog + text.chars().count();
    tokenize(text)
        .map(|(content, category)| Token {
            content: content.to_string(),
            category,
            delay: token_delay(content.chars().count(), category, queued, config),
        })
        .collect()
}
