//! Script-aware tokenizer for paced output.
//!
//! The scan is total and never reorders: every input character lands in
//! exactly one token, and concatenating the tokens yields the input.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Pacing category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCategory {
    /// A single CJK ideograph, kana or hangul syllable.
    Ideographic,
    /// A run of letters or a run of digits.
    Latin,
    Punctuation,
    Whitespace,
    /// Symbols that mostly show up in code and markup (backticks, braces...).
    CodeFence,
}

impl fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenCategory::Ideographic => "ideographic",
            TokenCategory::Latin => "latin",
            TokenCategory::Punctuation => "punctuation",
            TokenCategory::Whitespace => "whitespace",
            TokenCategory::CodeFence => "code",
        };
        f.write_str(name)
    }
}

/// A token queued for emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub content: String,
    pub category: TokenCategory,
    pub delay: Duration,
}

impl Token {
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Whether `ch` is paced as one ideographic unit.
#[must_use]
pub fn is_ideographic(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x309F     // Hiragana
            | 0x30A0..=0x30FF // Katakana
            | 0x3400..=0x4DBF // CJK Extension A
            | 0x4E00..=0x9FFF // CJK Unified Ideographs
            | 0xAC00..=0xD7AF // Hangul Syllables
            | 0xF900..=0xFAFF // CJK Compatibility Ideographs
            | 0x20000..=0x2FA1F // CJK Extensions B-F and supplement
    )
}

fn is_code_symbol(ch: char) -> bool {
    matches!(
        ch,
        '`' | '~'
            | '{'
            | '}'
            | '['
            | ']'
            | '<'
            | '>'
            | '|'
            | '\\'
            | '/'
            | '='
            | '_'
            | '$'
            | '#'
            | '@'
            | '^'
            | '&'
            | '*'
            | '%'
            | '+'
    )
}

fn is_letter(ch: char) -> bool {
    ch.is_alphabetic() && !is_ideographic(ch)
}

fn is_digit(ch: char) -> bool {
    ch.is_numeric()
}

/// Lazy scan over `text`. Cloning the iterator restarts from the same point.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    rest: &'a str,
}

/// Tokenize `text` into `(content, category)` pairs.
#[must_use]
pub fn tokenize(text: &str) -> Tokens<'_> {
    Tokens { rest: text }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = (&'a str, TokenCategory);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;

        let (category, run): (TokenCategory, Option<fn(char) -> bool>) = if is_ideographic(first)
        {
            (TokenCategory::Ideographic, None)
        } else if is_letter(first) {
            (TokenCategory::Latin, Some(is_letter))
        } else if is_digit(first) {
            (TokenCategory::Latin, Some(is_digit))
        } else if first.is_whitespace() {
            (TokenCategory::Whitespace, Some(char::is_whitespace))
        } else if is_code_symbol(first) {
            (TokenCategory::CodeFence, None)
        } else {
            (TokenCategory::Punctuation, None)
        };

        let end = match run {
            Some(continues) => self
                .rest
                .char_indices()
                .skip(1)
                .find(|(_, ch)| !continues(*ch))
                .map_or(self.rest.len(), |(index, _)| index),
            None => first.len_utf8(),
        };

        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some((token, category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(text: &str) -> Vec<(&str, TokenCategory)> {
        tokenize(text).collect()
    }

    #[test]
    fn mixed_script_sample() {
        assert_eq!(
            collect("你好world!"),
            vec![
                ("你", TokenCategory::Ideographic),
                ("好", TokenCategory::Ideographic),
                ("world", TokenCategory::Latin),
                ("!", TokenCategory::Punctuation),
            ]
        );
    }

    #[test]
    fn letters_digits_and_whitespace_form_runs() {
        assert_eq!(
            collect("abc123  \n\tdef"),
            vec![
                ("abc", TokenCategory::Latin),
                ("123", TokenCategory::Latin),
                ("  \n\t", TokenCategory::Whitespace),
                ("def", TokenCategory::Latin),
            ]
        );
    }

    #[test]
    fn symbols_are_single_character_tokens() {
        assert_eq!(
            collect("```rs"),
            vec![
                ("`", TokenCategory::CodeFence),
                ("`", TokenCategory::CodeFence),
                ("`", TokenCategory::CodeFence),
                ("rs", TokenCategory::Latin),
            ]
        );
        assert_eq!(
            collect("a_b"),
            vec![
                ("a", TokenCategory::Latin),
                ("_", TokenCategory::CodeFence),
                ("b", TokenCategory::Latin),
            ]
        );
        assert_eq!(collect("。"), vec![("。", TokenCategory::Punctuation)]);
    }

    #[test]
    fn accented_latin_stays_in_one_run() {
        assert_eq!(collect("café"), vec![("café", TokenCategory::Latin)]);
    }

    #[test]
    fn concatenation_reproduces_input() {
        let samples = [
            "",
            "plain ascii text, with punctuation.",
            "混合 text 和 code: `let x = 1;` 🙂\r\n",
            "e\u{301}\u{200d}",
            "こんにちは、세계 123_456",
        ];
        for sample in samples {
            let joined: String = tokenize(sample).map(|(token, _)| token).collect();
            assert_eq!(joined, sample);
            assert!(tokenize(sample).all(|(token, _)| !token.is_empty()));
        }
    }

    #[test]
    fn iterator_is_restartable_by_clone() {
        let mut tokens = tokenize("ab cd");
        assert_eq!(tokens.next(), Some(("ab", TokenCategory::Latin)));
        let snapshot = tokens.clone();
        assert_eq!(tokens.count(), 2);
        assert_eq!(snapshot.count(), 2);
    }
}
