//! Morphological tokenizer contract used by keyword retrieval.
//!
//! A [`Tokenizer`] turns text into [`Token`]s carrying a surface form, a
//! dictionary form (lemma), an optional reading and a coarse part of speech.
//! Implementations must be deterministic: the same input always produces the
//! same tokens.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

/// Closed-class words tagged as [`PartOfSpeech::Particle`] by [`WordTokenizer`].
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "if", "in", "into",
    "is", "it", "its", "of", "on", "or", "so", "than", "that", "the", "then", "there", "these",
    "this", "to", "was", "were", "with",
];

/// Coarse part-of-speech classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Numeral,
    Particle,
    Auxiliary,
    Symbol,
    Unknown,
}

impl PartOfSpeech {
    /// Whether tokens of this class carry meaning worth indexing.
    pub fn is_lexical(&self) -> bool {
        !matches!(
            self,
            PartOfSpeech::Particle | PartOfSpeech::Auxiliary | PartOfSpeech::Symbol
        )
    }
}

/// One analyzed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Text as it appears in the input.
    pub surface: String,
    /// Dictionary form.
    pub lemma: String,
    /// Phonetic reading, for scripts that have one.
    pub reading: Option<String>,
    pub pos: PartOfSpeech,
    /// Byte offset of `surface` in the analyzed text.
    pub offset: usize,
}

impl Token {
    pub fn is_lexical(&self) -> bool {
        self.pos.is_lexical()
    }
}

#[derive(Error, Debug)]
pub enum TokenizeError {
    #[error("Tokenizer is not ready: {0}")]
    NotReady(String),

    #[error("Failed to analyze text: {0}")]
    Analysis(String),
}

/// Analyzes text into tokens.
pub trait Tokenizer: Send + Sync {
    fn analyze(&self, text: &str) -> Result<Vec<Token>, TokenizeError>;
}

/// Default tokenizer splitting on unicode word boundaries.
///
/// Lemmas are lowercased surfaces, readings are never produced, numbers are
/// tagged [`PartOfSpeech::Numeral`] and the words in [`STOPWORDS`] are tagged
/// [`PartOfSpeech::Particle`].
#[derive(Debug, Clone, Default)]
pub struct WordTokenizer;

impl WordTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for WordTokenizer {
    fn analyze(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
        Ok(WORD
            .find_iter(text)
            .map(|m| {
                let surface = m.as_str();
                let lemma = surface.to_lowercase();
                let pos = if surface.chars().all(|c| c.is_numeric()) {
                    PartOfSpeech::Numeral
                } else if STOPWORDS.contains(&lemma.as_str()) {
                    PartOfSpeech::Particle
                } else {
                    PartOfSpeech::Unknown
                };
                Token {
                    surface: surface.to_string(),
                    lemma,
                    reading: None,
                    pos,
                    offset: m.start(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_tokenizer_basic() {
        let tokens = WordTokenizer::new().analyze("The Harbour, at 9 o'clock").unwrap();
        let surfaces: Vec<&str> = tokens.iter().map(|t| t.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["The", "Harbour", "at", "9", "o", "clock"]);

        assert_eq!(tokens[0].pos, PartOfSpeech::Particle);
        assert!(!tokens[0].is_lexical());
        assert_eq!(tokens[1].lemma, "harbour");
        assert_eq!(tokens[1].offset, 4);
        assert_eq!(tokens[3].pos, PartOfSpeech::Numeral);
        assert!(tokens[3].is_lexical());
    }

    #[test]
    fn test_punctuation_only_yields_nothing() {
        assert!(WordTokenizer::new().analyze("???").unwrap().is_empty());
        assert!(WordTokenizer::new().analyze("").unwrap().is_empty());
    }

    #[test]
    fn test_unicode_words() {
        let tokens = WordTokenizer::new().analyze("Café 港町").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].lemma, "café");
        assert_eq!(tokens[1].surface, "港町");
        assert!(tokens.iter().all(|t| t.reading.is_none()));
    }
}
