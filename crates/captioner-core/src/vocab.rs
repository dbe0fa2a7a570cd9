//! Rendering token ids as text
//!
//! The vocabulary is built elsewhere. It arrives here as a JSON array of
//! words whose positions are the token ids. `words[0]` is the start marker.
//! The stop marker defaults to `words[1]` but follows the sampling config.

use anyhow::{Context, Result};
use std::path::Path;

use crate::decoder::START_TOKEN;

/// Word rendered for ids outside the table
pub const UNKNOWN_WORD: &str = "<unk>";

/// Id-to-word table
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    pub fn from_words(words: Vec<String>) -> Self {
        Self { words }
    }

    /// Load a JSON array of words
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary: {}", path.display()))?;
        let words: Vec<String> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse vocabulary: {}", path.display()))?;
        tracing::debug!(words = words.len(), "loaded vocabulary");
        Ok(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    /// Join the words of a sampled caption
    ///
    /// The start marker is dropped and rendering ends at `stop_token`.
    pub fn render(&self, tokens: &[u32], stop_token: u32) -> String {
        tokens
            .iter()
            .copied()
            .take_while(|&id| id != stop_token)
            .filter(|&id| id != START_TOKEN)
            .map(|id| self.word(id).unwrap_or(UNKNOWN_WORD))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
