// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tokenizer contract consumed by the forward index, plus a simple
//! separator-based implementation.
//!
//! Stemming and phonetic expansion are external concerns; a tokenizer that
//! has them fills the optional [`Token`] fields and the forward index treats
//! the variants as lower-scored synonyms.

/// Separator bytes of the default tokenizer.
pub const DEFAULT_SEPARATORS: &[u8] = b" \t\r\n,.;:!?&@#$%^*()-+=~'\"`{}[]<>/\\|";

/// One token produced by a tokenizer. Borrows from the tokenizer's scratch
/// state; valid until the next `next_token` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The normalized (folded) token.
    pub token: &'a str,
    /// The raw surface form in the original text.
    pub raw: &'a str,
    /// Token position within the document, starting at 1.
    pub position: u32,
    /// Stemmed variant, if the tokenizer stems.
    pub stem: Option<&'a str>,
    /// Phonetic form, if the tokenizer produces one.
    pub phonetics: Option<&'a str>,
}

/// A resettable token stream.
pub trait Tokenizer {
    /// Starts tokenizing `text`, resetting all state.
    fn start(&mut self, text: &str);

    /// Produces the next token, or `None` at the end of the text.
    fn next_token(&mut self) -> Option<Token<'_>>;
}

/// Whitespace/punctuation tokenizer with ASCII case folding and stopword
/// removal. Stopwords consume a position but are not emitted.
pub struct SimpleTokenizer<'s> {
    separators: &'s [u8],
    stopwords: &'s [&'s str],
    raw: String,
    folded: String,
    offset: usize,
    position: u32,
}

impl<'s> SimpleTokenizer<'s> {
    /// Creates a tokenizer over borrowed separator and stopword lists.
    #[must_use]
    pub fn new(separators: &'s [u8], stopwords: &'s [&'s str]) -> Self {
        Self {
            separators,
            stopwords,
            raw: String::new(),
            folded: String::new(),
            offset: 0,
            position: 0,
        }
    }

    fn is_separator(&self, byte: u8) -> bool {
        self.separators.contains(&byte)
    }
}

impl Default for SimpleTokenizer<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATORS, &[])
    }
}

impl Tokenizer for SimpleTokenizer<'_> {
    fn start(&mut self, text: &str) {
        self.raw.clear();
        self.raw.push_str(text);
        self.folded.clear();
        self.folded.push_str(text);
        // ASCII-only folding keeps byte offsets aligned with the raw text
        self.folded.make_ascii_lowercase();
        self.offset = 0;
        self.position = 0;
    }

    fn next_token(&mut self) -> Option<Token<'_>> {
        loop {
            let bytes = self.folded.as_bytes();

            let mut start = self.offset;
            while bytes.get(start).is_some_and(|&b| self.separators.contains(&b)) {
                start += 1;
            }
            if start >= bytes.len() {
                self.offset = start;
                return None;
            }

            let mut end = start;
            while bytes.get(end).is_some_and(|&b| !self.separators.contains(&b)) {
                end += 1;
            }
            self.offset = end;
            self.position += 1;

            let folded = self.folded.get(start..end)?;
            if self.stopwords.contains(&folded) {
                continue;
            }

            return Some(Token {
                token: folded,
                raw: self.raw.get(start..end)?,
                position: self.position,
                stem: None,
                phonetics: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn tokens(text: &str, stopwords: &[&str]) -> Vec<(String, u32)> {
        let stopwords: Vec<&str> = stopwords.to_vec();
        let mut tokenizer = SimpleTokenizer::new(DEFAULT_SEPARATORS, &stopwords);
        tokenizer.start(text);

        let mut out = vec![];
        while let Some(token) = tokenizer.next_token() {
            out.push((token.token.to_string(), token.position));
        }
        out
    }

    #[test]
    fn splits_and_folds() {
        assert_eq!(
            vec![
                ("hello".to_string(), 1),
                ("world".to_string(), 2),
                ("again".to_string(), 3)
            ],
            tokens("Hello, WORLD... again!", &[])
        );
    }

    #[test]
    fn stopwords_consume_positions() {
        assert_eq!(
            vec![("quick".to_string(), 2), ("fox".to_string(), 4)],
            tokens("the quick a fox", &["the", "a"])
        );
    }

    #[test]
    fn empty_and_separator_only_text() {
        assert!(tokens("", &[]).is_empty());
        assert!(tokens("... ,,, ", &[]).is_empty());
    }

    #[test]
    fn raw_preserves_case() {
        let mut tokenizer = SimpleTokenizer::default();
        tokenizer.start("MiXeD case");
        let token = tokenizer.next_token().expect("token");
        assert_eq!("mixed", token.token);
        assert_eq!("MiXeD", token.raw);
    }
}
