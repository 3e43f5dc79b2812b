/// WordPiece vocabulary loaded from a `vocab.txt` file.
///
/// One token per line; the 0-based line index is the token id.
use std::collections::HashMap;
use std::path::Path;

use super::EmbedderError;

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Immutable token → id table.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    ids: HashMap<String, i64>,
}

impl Vocabulary {
    /// Load a vocabulary file from disk.
    pub fn from_file(path: &Path) -> Result<Self, EmbedderError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            EmbedderError::Vocabulary(format!("failed to read {}: {e}", path.display()))
        })?;

        // Editors on Windows like to prepend a byte-order mark.
        let data = data.strip_prefix('\u{feff}').unwrap_or(&data);

        let vocab = Self::from_lines(data.lines());
        if vocab.is_empty() {
            return Err(EmbedderError::Vocabulary(format!(
                "{} contains no tokens",
                path.display()
            )));
        }
        Ok(vocab)
    }

    /// Build a vocabulary from lines, trimming surrounding whitespace.
    ///
    /// Duplicate tokens keep the id of their last occurrence.
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| (line.trim().to_string(), i as i64))
            .collect();
        Self { ids }
    }

    /// Look up the id of a token.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<i64> {
        self.ids.get(token).copied()
    }

    /// Look up a token that must be present.
    pub fn require(&self, token: &str) -> Result<i64, EmbedderError> {
        self.get(token).ok_or_else(|| {
            EmbedderError::Vocabulary(format!("required token {token} missing from vocabulary"))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
