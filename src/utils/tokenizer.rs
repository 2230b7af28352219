//! CLIP byte-level BPE tokenizer for detector text prompts
//!
//! Reads the `vocab.json` / `merges.txt` pair shipped with OWL-style models.
//! Prompts are lower-cased, whitespace-collapsed, split into words, encoded
//! byte-wise and merged by rank. Every prompt becomes
//! `<|startoftext|> tokens.. <|endoftext|>`, truncated and zero-padded to a
//! fixed length with a matching attention mask.

use crate::error::{Result, SearchError};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const START_TOKEN: &str = "<|startoftext|>";
const END_TOKEN: &str = "<|endoftext|>";
const END_OF_WORD: &str = "</w>";
const CONTRACTIONS: [&str; 7] = ["'s", "'t", "'re", "'ve", "'m", "'ll", "'d"];

/// Token ids and attention mask for a prompt batch, both `[batch, max_length]`
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPrompts {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
}

/// CLIP BPE tokenizer
#[derive(Debug, Clone)]
pub struct ClipTokenizer {
    encoder: HashMap<String, i64>,
    merge_ranks: HashMap<(String, String), usize>,
    byte_encoder: [char; 256],
    start_id: i64,
    end_id: i64,
    max_length: usize,
}

impl ClipTokenizer {
    /// Load from a model folder's `vocab.json` and `merges.txt`
    ///
    /// # Errors
    /// - Files unreadable
    /// - Invalid vocabulary JSON
    /// - Special tokens missing from the vocabulary
    pub fn from_files(vocab_path: &Path, merges_path: &Path, max_length: usize) -> Result<Self> {
        let vocab = fs::read_to_string(vocab_path)
            .map_err(|e| SearchError::file_io_error("read tokenizer vocabulary", vocab_path, &e))?;
        let merges = fs::read_to_string(merges_path)
            .map_err(|e| SearchError::file_io_error("read tokenizer merges", merges_path, &e))?;
        let encoder: HashMap<String, i64> = serde_json::from_str(&vocab).map_err(|e| {
            SearchError::model(format!(
                "Invalid tokenizer vocabulary {}: {e}",
                vocab_path.display()
            ))
        })?;
        Self::new(encoder, &merges, max_length)
    }

    /// Build from an in-memory vocabulary and merges text
    ///
    /// # Errors
    /// - Special tokens missing from the vocabulary
    /// - `max_length` below 2
    pub fn new(encoder: HashMap<String, i64>, merges: &str, max_length: usize) -> Result<Self> {
        if max_length < 2 {
            return Err(SearchError::config_value_error("max text tokens", max_length, ">= 2"));
        }
        let special = |token: &str| {
            encoder.get(token).copied().ok_or_else(|| {
                SearchError::model(format!("Tokenizer vocabulary has no {token} token"))
            })
        };
        let start_id = special(START_TOKEN)?;
        let end_id = special(END_TOKEN)?;

        let merge_ranks = merges
            .lines()
            .filter(|line| !line.starts_with("#version") && !line.trim().is_empty())
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                Some((parts.next()?.to_string(), parts.next()?.to_string()))
            })
            .enumerate()
            .map(|(rank, pair)| (pair, rank))
            .collect();

        Ok(Self {
            encoder,
            merge_ranks,
            byte_encoder: bytes_to_unicode(),
            start_id,
            end_id,
            max_length,
        })
    }

    /// Fixed sequence length of encoded prompts
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Token ids of one prompt, with start and end tokens, not padded
    ///
    /// # Errors
    /// - A BPE symbol missing from the vocabulary
    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let mut ids = vec![self.start_id];
        for word in split_words(&normalize(text)) {
            let encoded: String = word
                .bytes()
                .map(|b| self.byte_encoder.get(usize::from(b)).copied().unwrap_or('?'))
                .collect();
            for token in self.bpe(&encoded) {
                let id = self.encoder.get(&token).copied().ok_or_else(|| {
                    SearchError::processing(format!("Token '{token}' missing from vocabulary"))
                })?;
                ids.push(id);
            }
        }
        ids.push(self.end_id);

        if ids.len() > self.max_length {
            log::debug!(
                "Prompt '{}' truncated from {} to {} tokens",
                text,
                ids.len(),
                self.max_length
            );
            ids.truncate(self.max_length - 1);
            ids.push(self.end_id);
        }
        Ok(ids)
    }

    /// Encode a prompt batch into padded `[batch, max_length]` tensors
    ///
    /// # Errors
    /// - Empty batch
    /// - Any prompt fails to encode
    pub fn encode_batch(&self, prompts: &[String]) -> Result<EncodedPrompts> {
        if prompts.is_empty() {
            return Err(SearchError::processing("No text prompts to encode"));
        }
        let mut input_ids = Array2::<i64>::zeros((prompts.len(), self.max_length));
        let mut attention_mask = Array2::<i64>::zeros((prompts.len(), self.max_length));

        for (row, prompt) in prompts.iter().enumerate() {
            for (col, id) in self.encode(prompt)?.into_iter().enumerate() {
                if let Some(slot) = input_ids.get_mut((row, col)) {
                    *slot = id;
                }
                if let Some(slot) = attention_mask.get_mut((row, col)) {
                    *slot = 1;
                }
            }
        }

        Ok(EncodedPrompts {
            input_ids,
            attention_mask,
        })
    }

    /// Apply merges to one byte-encoded word
    fn bpe(&self, word: &str) -> Vec<String> {
        let mut symbols: Vec<String> = word.chars().map(String::from).collect();
        if let Some(last) = symbols.last_mut() {
            last.push_str(END_OF_WORD);
        }

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .enumerate()
                .filter_map(|(i, pair)| match pair {
                    [a, b] => self
                        .merge_ranks
                        .get(&(a.clone(), b.clone()))
                        .map(|rank| (*rank, i)),
                    _ => None,
                })
                .min();

            let Some((_, index)) = best else {
                break;
            };
            let right = symbols.remove(index + 1);
            if let Some(left) = symbols.get_mut(index) {
                left.push_str(&right);
            }
        }
        symbols
    }
}

/// Lower-case and collapse whitespace
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// CLIP pre-tokenization: contractions, letter runs, single digits and
/// runs of other symbols
fn split_words(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' {
            let rest: String = chars.iter().skip(i).take(3).collect();
            if let Some(contraction) = CONTRACTIONS.iter().find(|cont| rest.starts_with(**cont)) {
                words.push((*contraction).to_string());
                i += contraction.chars().count();
                continue;
            }
        }

        let start = i;
        if c.is_alphabetic() {
            while chars.get(i).is_some_and(|ch| ch.is_alphabetic()) {
                i += 1;
            }
        } else if c.is_numeric() {
            i += 1;
        } else {
            while chars
                .get(i)
                .is_some_and(|ch| !ch.is_whitespace() && !ch.is_alphabetic() && !ch.is_numeric())
            {
                i += 1;
                if chars.get(i) == Some(&'\'') {
                    break;
                }
            }
        }
        words.push(chars.get(start..i).unwrap_or_default().iter().collect());
    }
    words
}

/// GPT-2 byte to printable-character table
fn bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut extra = 0u32;
    for byte in 0..=255u8 {
        let printable = matches!(byte, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        let code = if printable {
            u32::from(byte)
        } else {
            extra += 1;
            255 + extra
        };
        if let Some(slot) = table.get_mut(usize::from(byte)) {
            *slot = char::from_u32(code).unwrap_or('?');
        }
    }
    table
}
