/// WordPiece tokenizer for BERT/MiniLM-style ONNX models.
///
/// Produces input ids and an attention mask for the ONNX embedder from a
/// plain `vocab.txt` vocabulary.
use super::EmbedderError;
use super::vocab::{CLS_TOKEN, PAD_TOKEN, SEP_TOKEN, UNK_TOKEN, Vocabulary};

/// Maximum sequence length (including `[CLS]` and `[SEP]`).
pub const MAX_SEQUENCE_LENGTH: usize = 256;

/// Prefix marking a non-initial subword piece.
const CONTINUATION_PREFIX: &str = "##";

/// Output of a tokenization operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    /// Token IDs (input_ids for the model).
    pub input_ids: Vec<i64>,
    /// Attention mask (1 for real tokens, 0 for padding).
    pub attention_mask: Vec<i64>,
    pad_id: i64,
}

impl TokenizedInput {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Right-pad with `[PAD]` (mask 0) up to `len` for fixed-shape graphs.
    pub fn pad_to(&mut self, len: usize) {
        if self.input_ids.len() >= len {
            return;
        }
        self.input_ids.resize(len, self.pad_id);
        self.attention_mask.resize(len, 0);
    }
}

/// Sentinel ids resolved once at construction.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    cls: i64,
    sep: i64,
    pad: i64,
    unk: i64,
}

/// Greedy longest-match-first WordPiece tokenizer.
pub struct WordPieceTokenizer {
    vocab: Vocabulary,
    special: SpecialTokens,
    max_length: usize,
}

impl WordPieceTokenizer {
    /// Create a tokenizer; fails if any sentinel token is missing.
    pub fn new(vocab: Vocabulary) -> Result<Self, EmbedderError> {
        let special = SpecialTokens {
            cls: vocab.require(CLS_TOKEN)?,
            sep: vocab.require(SEP_TOKEN)?,
            pad: vocab.require(PAD_TOKEN)?,
            unk: vocab.require(UNK_TOKEN)?,
        };

        Ok(Self {
            vocab,
            special,
            max_length: MAX_SEQUENCE_LENGTH,
        })
    }

    /// Override the maximum sequence length (minimum 2, for `[CLS]` and `[SEP]`).
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.max(2);
        self
    }

    /// Tokenize a single text, returning input IDs and attention mask.
    ///
    /// The result is never padded; its length is at most `max_length`.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> TokenizedInput {
        let budget = self.max_length - 1;
        let mut input_ids = vec![self.special.cls];

        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            match self.vocab.get(&word) {
                Some(id) => input_ids.push(id),
                None => input_ids.extend(self.tokenize_word(&word)),
            }

            if input_ids.len() >= budget {
                break;
            }
        }

        // A word split into several pieces can overshoot the budget.
        input_ids.truncate(budget);
        input_ids.push(self.special.sep);

        let attention_mask = vec![1; input_ids.len()];
        TokenizedInput {
            input_ids,
            attention_mask,
            pad_id: self.special.pad,
        }
    }

    /// Split one lowercased word into subword ids.
    ///
    /// Characters accumulate until the candidate (prefixed with `##` once a
    /// piece has been emitted) is found in the vocabulary. If no piece
    /// matched, or characters are left over, the whole word becomes a
    /// single `[UNK]`.
    fn tokenize_word(&self, word: &str) -> Vec<i64> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for c in word.chars() {
            current.push(c);

            let hit = if pieces.is_empty() {
                self.vocab.get(&current)
            } else {
                self.vocab.get(&format!("{CONTINUATION_PREFIX}{current}"))
            };

            if let Some(id) = hit {
                pieces.push(id);
                current.clear();
            }
        }

        if pieces.is_empty() || !current.is_empty() {
            return vec![self.special.unk];
        }
        pieces
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Get the configured maximum sequence length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}
