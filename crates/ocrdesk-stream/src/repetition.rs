//! Repetition collapse detection
//!
//! A generation model stuck in a loop repeats one sentence, alternates
//! between two, or replays a longer verbatim block. Each heuristic below
//! targets one of those shapes and only inspects the end of the text, so
//! the check stays cheap when it runs after every delta.

use serde::{Deserialize, Serialize};

/// Tunable thresholds. Lengths are counted in characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepetitionConfig {
    /// Sentences shorter than this are ignored entirely
    pub min_sentence_chars: usize,
    /// Number of trailing sentences checked for exact repeats
    pub sentence_window: usize,
    /// Occurrences within the window that count as a loop
    pub sentence_repeats: usize,
    /// Number of trailing sentences checked for A-B-A-B cycling
    pub pair_window: usize,
    /// Trailing characters examined for block repetition
    pub tail_chars: usize,
    pub chunk_min_chars: usize,
    pub chunk_max_chars: usize,
    pub chunk_step_chars: usize,
    /// A repeated block must carry more than this many non-padding characters
    pub min_chunk_content: usize,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            min_sentence_chars: 10,
            sentence_window: 6,
            sentence_repeats: 3,
            pair_window: 8,
            tail_chars: 600,
            chunk_min_chars: 50,
            chunk_max_chars: 300,
            chunk_step_chars: 50,
            min_chunk_content: 30,
        }
    }
}

/// Which heuristic fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionReason {
    RepeatedSentence,
    AlternatingSentences,
    RepeatedBlock,
}

impl RepetitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepetitionReason::RepeatedSentence => "repeated sentence",
            RepetitionReason::AlternatingSentences => "alternating sentences",
            RepetitionReason::RepeatedBlock => "repeated text block",
        }
    }
}

impl std::fmt::Display for RepetitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepetitionVerdict {
    pub reason: Option<RepetitionReason>,
}

impl RepetitionVerdict {
    pub fn is_flagged(&self) -> bool {
        self.reason.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepetitionDetector {
    config: RepetitionConfig,
}

impl RepetitionDetector {
    pub fn new(config: RepetitionConfig) -> Self {
        Self { config }
    }

    /// Evaluate the full accumulated text
    pub fn detect(&self, text: &str) -> RepetitionVerdict {
        let reason = self
            .repeated_sentence(text)
            .or_else(|| self.alternating_sentences(text))
            .or_else(|| self.repeated_block(text));

        RepetitionVerdict { reason }
    }

    fn repeated_sentence(&self, text: &str) -> Option<RepetitionReason> {
        let sentences = self.trailing_sentences(text, self.config.sentence_window);

        sentences
            .iter()
            .filter(|s| self.is_long(s))
            .any(|s| sentences.iter().filter(|other| *other == s).count() >= self.config.sentence_repeats)
            .then_some(RepetitionReason::RepeatedSentence)
    }

    fn alternating_sentences(&self, text: &str) -> Option<RepetitionReason> {
        let sentences = self.trailing_sentences(text, self.config.pair_window);

        sentences
            .windows(4)
            .any(|w| {
                w[0] == w[2]
                    && w[1] == w[3]
                    && w[0] != w[1]
                    && self.is_long(w[0])
                    && self.is_long(w[1])
            })
            .then_some(RepetitionReason::AlternatingSentences)
    }

    fn repeated_block(&self, text: &str) -> Option<RepetitionReason> {
        let tail = tail_chars(text, self.config.tail_chars);
        let step = self.config.chunk_step_chars.max(1);

        for size in (self.config.chunk_min_chars.max(1)..=self.config.chunk_max_chars).step_by(step) {
            if tail.len() < size * 2 {
                break;
            }

            let end = tail.len();
            let last = &tail[end - size..];
            let previous = &tail[end - size * 2..end - size];

            if last == previous && trimmed_len(last) > self.config.min_chunk_content {
                return Some(RepetitionReason::RepeatedBlock);
            }
        }

        None
    }

    /// Last `count` qualifying sentences, oldest first
    fn trailing_sentences<'a>(&self, text: &'a str, count: usize) -> Vec<&'a str> {
        let mut sentences: Vec<&str> = text
            .rsplit(is_sentence_break)
            .map(str::trim)
            .filter(|s| s.chars().count() >= self.config.min_sentence_chars)
            .take(count)
            .collect();
        sentences.reverse();
        sentences
    }

    fn is_long(&self, sentence: &str) -> bool {
        sentence.chars().count() > self.config.min_sentence_chars
    }
}

/// Evaluate `text` with the default thresholds
pub fn detect(text: &str) -> RepetitionVerdict {
    RepetitionDetector::default().detect(text)
}

fn is_sentence_break(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n')
}

fn tail_chars(text: &str, count: usize) -> Vec<char> {
    let start = match count.checked_sub(1) {
        Some(skip) => text
            .char_indices()
            .rev()
            .nth(skip)
            .map(|(i, _)| i)
            .unwrap_or(0),
        None => text.len(),
    };
    text[start..].chars().collect()
}

fn trimmed_len(chunk: &[char]) -> usize {
    let start = chunk.iter().position(|c| !c.is_whitespace());
    let end = chunk.iter().rposition(|c| !c.is_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => end - start + 1,
        _ => 0,
    }
}
