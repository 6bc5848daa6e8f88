//! Text normalization applied by the Cleaning stage.
//!
//! [`clean_text`] runs a fixed sequence; later steps assume the earlier ones already ran:
//!
//! 1. strip zero-width and byte-order-mark characters
//! 2. canonical composition (NFC)
//! 3. line breaks and tabs become plain spaces
//! 4. runs of two or more whitespace characters collapse to one space
//! 5. trim
//! 6. strip non-printable control characters
//! 7. cap runs of four or more identical punctuation marks at three
//!
//! When step 6 removes anything, steps 2, 4 and 5 are re-applied to the result so a second
//! pass over cleaned text is a no-op.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Longest run of one punctuation mark kept by the cleaner.
pub const MAX_PUNCTUATION_RUN: usize = 3;

/// Default upper bound on document length accepted by the cleaner, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 200_000;

const ZERO_WIDTH: [char; 6] = [
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // byte order mark
    '\u{180E}', // mongolian vowel separator
];

/// Tunables for [`clean_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningOptions {
    /// Inputs longer than this many characters are refused.
    pub max_content_chars: Option<usize>,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            max_content_chars: Some(DEFAULT_MAX_CONTENT_CHARS),
        }
    }
}

/// Errors raised while cleaning a single document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CleaningError {
    /// The document exceeds the configured size limit.
    #[error("content has {chars} characters, limit is {max}")]
    InputTooLarge {
        /// Characters in the input.
        chars: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Cleaned text plus which transformation families changed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedText {
    /// Normalized text.
    pub text: String,
    /// Line breaks, tabs, whitespace runs, or edges changed.
    pub whitespace_normalized: bool,
    /// Zero-width, control, or surplus punctuation characters were removed.
    pub special_chars_removed: bool,
    /// NFC changed the text.
    pub unicode_normalized: bool,
}

impl CleanedText {
    /// Whether nothing but whitespace is left.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Normalize `input` without changing its meaning.
pub fn clean_text(input: &str, options: &CleaningOptions) -> Result<CleanedText, CleaningError> {
    if let Some(max) = options.max_content_chars {
        let chars = input.chars().count();
        if chars > max {
            return Err(CleaningError::InputTooLarge { chars, max });
        }
    }

    let (stripped, zero_width_removed) = strip_zero_width(input);
    let composed: String = stripped.nfc().collect();
    let unicode_normalized = composed != stripped;

    let (spaced, breaks_replaced) = replace_line_breaks(&composed);
    let (collapsed, runs_collapsed) = collapse_whitespace(&spaced);
    let trimmed = collapsed.trim();
    let edges_trimmed = trimmed.len() != collapsed.len();

    let (printable, controls_removed) = strip_control_chars(trimmed);
    let printable = if controls_removed {
        let recomposed: String = printable.nfc().collect();
        let (recollapsed, _) = collapse_whitespace(&recomposed);
        recollapsed.trim().to_string()
    } else {
        printable
    };

    let (text, punctuation_capped) = cap_repeated_punctuation(&printable, MAX_PUNCTUATION_RUN);

    Ok(CleanedText {
        text,
        whitespace_normalized: breaks_replaced || runs_collapsed || edges_trimmed,
        special_chars_removed: zero_width_removed || controls_removed || punctuation_capped,
        unicode_normalized,
    })
}

fn strip_zero_width(input: &str) -> (String, bool) {
    let output: String = input.chars().filter(|ch| !ZERO_WIDTH.contains(ch)).collect();
    let changed = output.len() != input.len();
    (output, changed)
}

fn is_line_break(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\r' | '\t' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn replace_line_breaks(input: &str) -> (String, bool) {
    let mut changed = false;
    let output = input
        .chars()
        .map(|ch| {
            if is_line_break(ch) {
                changed = true;
                ' '
            } else {
                ch
            }
        })
        .collect();
    (output, changed)
}

fn collapse_whitespace(input: &str) -> (String, bool) {
    let mut output = String::with_capacity(input.len());
    let mut changed = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_whitespace() && chars.peek().is_some_and(|next| next.is_whitespace()) {
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            output.push(' ');
            changed = true;
        } else {
            output.push(ch);
        }
    }

    (output, changed)
}

fn strip_control_chars(input: &str) -> (String, bool) {
    let output: String = input
        .chars()
        .filter(|ch| !ch.is_control() || matches!(ch, ' ' | '\t' | '\n'))
        .collect();
    let changed = output.len() != input.len();
    (output, changed)
}

/// Punctuation marks recognised by the cleaner and the lexical tokenizer.
///
/// ASCII punctuation plus the general punctuation block, Devanagari danda marks, and the
/// common CJK and full-width marks found in translated verse collections.
pub(crate) fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation()
        || matches!(
            ch,
            '\u{00A1}'
                | '\u{00AB}'
                | '\u{00B7}'
                | '\u{00BB}'
                | '\u{00BF}'
                | '\u{0964}'
                | '\u{0965}'
                | '\u{2010}'..='\u{2027}'
                | '\u{2030}'..='\u{205E}'
                | '\u{3001}'..='\u{3003}'
                | '\u{3008}'..='\u{3011}'
                | '\u{FF01}'..='\u{FF0F}'
                | '\u{FF1A}'..='\u{FF1F}'
        )
}

fn cap_repeated_punctuation(input: &str, max_run: usize) -> (String, bool) {
    let mut output = String::with_capacity(input.len());
    let mut changed = false;
    let mut previous: Option<char> = None;
    let mut run = 0usize;

    for ch in input.chars() {
        if previous == Some(ch) && is_punctuation(ch) {
            run += 1;
        } else {
            run = 1;
        }
        previous = Some(ch);

        if run > max_run {
            changed = true;
            continue;
        }
        output.push(ch);
    }

    (output, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(input: &str) -> CleanedText {
        clean_text(input, &CleaningOptions::default()).expect("cleaning succeeds")
    }

    #[test]
    fn collapses_whitespace_and_line_breaks() {
        let cleaned = clean("dharma   is\t\tduty\n\n");
        assert_eq!(cleaned.text, "dharma is duty");
        assert!(cleaned.whitespace_normalized);
        assert!(!cleaned.special_chars_removed);
    }

    #[test]
    fn caps_repeated_punctuation() {
        let cleaned = clean("Really?????");
        assert_eq!(cleaned.text, "Really???");
        assert!(cleaned.special_chars_removed);
        assert_eq!(clean("Wait...").text, "Wait...");
        assert_eq!(clean("।।।।।").text, "।।।");
    }

    #[test]
    fn strips_zero_width_and_bom() {
        let cleaned = clean("\u{FEFF}yoga\u{200B}sutra");
        assert_eq!(cleaned.text, "yogasutra");
        assert!(cleaned.special_chars_removed);
    }

    #[test]
    fn composes_decomposed_characters() {
        let cleaned = clean("Kr\u{0073}\u{0323}n\u{0323}a");
        assert_eq!(cleaned.text, "Kr\u{1E63}\u{1E47}a");
        assert!(cleaned.unicode_normalized);
    }

    #[test]
    fn control_removal_does_not_leave_double_spaces() {
        let cleaned = clean("om \u{0001} shanti\u{0007}");
        assert_eq!(cleaned.text, "om shanti");
        assert_eq!(clean(&cleaned.text), cleaned_copy(&cleaned.text));
    }

    fn cleaned_copy(text: &str) -> CleanedText {
        CleanedText {
            text: text.to_string(),
            whitespace_normalized: false,
            special_chars_removed: false,
            unicode_normalized: false,
        }
    }

    #[test]
    fn cleaning_is_idempotent() {
        let inputs = [
            "  \u{FEFF}Verse 2.47:\tkarmaṇy evādhikāras te\r\nmā phaleṣu kadācana!!!!  ",
            "om \u{0001} shanti\u{0007}",
            "e\u{0001}\u{0301}",
            "\n\n\t",
        ];
        for input in inputs {
            let first = clean(input);
            let second = clean(&first.text);
            assert_eq!(first.text, second.text, "input {input:?}");
        }
    }

    #[test]
    fn whitespace_only_input_becomes_blank() {
        let cleaned = clean(" \u{200B}\n\t ");
        assert!(cleaned.is_blank());
    }

    #[test]
    fn refuses_oversized_input() {
        let options = CleaningOptions {
            max_content_chars: Some(4),
        };
        let error = clean_text("too long", &options).unwrap_err();
        assert_eq!(error, CleaningError::InputTooLarge { chars: 8, max: 4 });
    }
}
