//! Token counting with a BPE tokenizer and a character-based fallback

use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, warn};

use super::CHARS_PER_TOKEN;

/// Counts tokens for chunk budgeting.
///
/// Uses a `tokenizer.json` BPE tokenizer when one is configured and loads
/// successfully. Any failure (no file, unreadable file, encoding error)
/// degrades to `chars / 4`, so chunking never fails because of the
/// tokenizer.
pub struct TokenCounter {
    tokenizer: Option<Tokenizer>,
}

impl TokenCounter {
    /// Character heuristic only
    pub fn heuristic() -> Self {
        Self { tokenizer: None }
    }

    /// Load a tokenizer from a `tokenizer.json` file, falling back to the
    /// heuristic if it cannot be loaded.
    pub fn from_file(path: &Path) -> Self {
        match Tokenizer::from_file(path) {
            Ok(tokenizer) => {
                debug!("Loaded tokenizer from {}", path.display());
                Self {
                    tokenizer: Some(tokenizer),
                }
            }
            Err(e) => {
                warn!(
                    "Failed to load tokenizer from {}: {}. Falling back to ~{} chars per token",
                    path.display(),
                    e,
                    CHARS_PER_TOKEN
                );
                Self::heuristic()
            }
        }
    }

    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::heuristic(),
        }
    }

    /// True when no BPE tokenizer is available
    pub fn is_heuristic(&self) -> bool {
        self.tokenizer.is_none()
    }

    /// Number of tokens in `text`
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        if let Some(tokenizer) = &self.tokenizer {
            match tokenizer.encode(text, false) {
                Ok(encoding) => return encoding.get_ids().len(),
                Err(e) => debug!("Tokenizer encode failed, using heuristic: {}", e),
            }
        }

        approximate_tokens(text)
    }

    /// Byte offset in `text` where its last `tokens` tokens begin.
    ///
    /// Returns 0 when `text` has no more than `tokens` tokens.
    pub fn tail_start(&self, text: &str, tokens: usize) -> usize {
        if tokens == 0 {
            return text.len();
        }

        if let Some(tokenizer) = &self.tokenizer {
            if let Ok(encoding) = tokenizer.encode(text, false) {
                let offsets = encoding.get_offsets();
                if offsets.len() <= tokens {
                    return 0;
                }
                let start = offsets[offsets.len() - tokens].0;
                if text.is_char_boundary(start) {
                    return start;
                }
            }
        }

        let char_count = text.chars().count();
        let tail_chars = tokens * CHARS_PER_TOKEN;
        if char_count <= tail_chars {
            return 0;
        }

        text.char_indices()
            .nth(char_count - tail_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("heuristic", &self.is_heuristic())
            .finish()
    }
}

/// `chars / 4`, at least one token for non-empty text
fn approximate_tokens(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Word-level tokenizer over a tiny vocabulary, split on whitespace
    /// and punctuation.
    fn word_level_counter(temp: &TempDir) -> TokenCounter {
        let definition = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": { "[UNK]": 0, "café": 1, "crème": 2, "brûlée": 3, ".": 4 },
                "unk_token": "[UNK]"
            }
        });
        let path = temp.path().join("tokenizer.json");
        std::fs::write(&path, definition.to_string()).unwrap();
        TokenCounter::from_file(&path)
    }

    #[test]
    fn test_heuristic_count() {
        let counter = TokenCounter::heuristic();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("Hi"), 1);
        assert_eq!(counter.count("abcdefgh"), 2);
        assert!(counter.is_heuristic());
    }

    #[test]
    fn test_longer_text_counts_more() {
        let counter = TokenCounter::heuristic();
        let short = "Short text.";
        let long = "This is a much longer text that should contain many more tokens than the short one.";
        assert!(counter.count(long) > counter.count(short));
    }

    #[test]
    fn test_missing_tokenizer_file_falls_back() {
        let counter = TokenCounter::from_file(Path::new("/nonexistent/tokenizer.json"));
        assert!(counter.is_heuristic());
        assert_eq!(counter.count("abcdefgh"), 2);
    }

    #[test]
    fn test_tail_start_heuristic() {
        let counter = TokenCounter::heuristic();
        let text = "one two three four";
        // last 2 tokens ~ last 8 chars
        assert_eq!(&text[counter.tail_start(text, 2)..], "ree four");
        assert_eq!(counter.tail_start(text, 10), 0);
        assert_eq!(counter.tail_start(text, 0), text.len());
    }

    #[test]
    fn test_tail_start_multibyte() {
        let counter = TokenCounter::heuristic();
        let text = "café crème brûlée";
        let start = counter.tail_start(text, 1);
        assert!(text.is_char_boundary(start));
        assert_eq!(&text[start..], "ûlée");
    }

    #[test]
    fn test_tokenizer_count() {
        let temp = TempDir::new().unwrap();
        let counter = word_level_counter(&temp);
        assert!(!counter.is_heuristic());

        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("café crème brûlée"), 3);
        assert_eq!(counter.count("café."), 2);
        // Out-of-vocabulary words still count as one token each
        assert_eq!(counter.count("café au lait"), 3);
    }

    #[test]
    fn test_tokenizer_tail_start_uses_byte_offsets() {
        let temp = TempDir::new().unwrap();
        let counter = word_level_counter(&temp);
        let text = "café crème brûlée";

        assert_eq!(counter.tail_start(text, 1), 13);
        assert_eq!(&text[counter.tail_start(text, 1)..], "brûlée");
        assert_eq!(counter.tail_start(text, 2), 6);
        assert_eq!(&text[counter.tail_start(text, 2)..], "crème brûlée");
        assert_eq!(counter.tail_start(text, 3), 0);
        assert_eq!(counter.tail_start(text, 0), text.len());
    }
}
