// Vocabulary table: token -> integer id.
//
// A token's position in the ordered table is its id. Id 0 is reserved for
// out-of-vocabulary tokens, and it doubles as the padding id.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

/// Id returned for any token not in the table.
pub const UNKNOWN_ID: u32 = 0;

/// A word index may skip ids, but its largest id must stay within
/// `entries * SPARSE_ID_FACTOR + SPARSE_ID_SLACK`.
const SPARSE_ID_FACTOR: usize = 4;
const SPARSE_ID_SLACK: usize = 1024;

/// Read-only token table. Built once from an artifact, never mutated.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, u32>,
    /// Ids at or above this bound are treated as unknown.
    limit: u32,
}

impl Vocabulary {
    /// Build from an ordered token list. Position 0 is the reserved slot
    /// whatever it contains. Duplicate tokens keep their first position.
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate().skip(1) {
            index.entry(token.clone()).or_insert(i as u32);
        }
        let limit = tokens.len() as u32;
        Self {
            tokens,
            index,
            limit,
        }
    }

    /// Build from an explicit word -> id mapping. Ids must be >= 1; gaps are
    /// filled with empty placeholder slots that never match a real token.
    pub fn from_word_index(word_index: &HashMap<String, u32>) -> EngineResult<Self> {
        if let Some((word, _)) = word_index.iter().find(|(_, &id)| id == UNKNOWN_ID) {
            return Err(EngineError::startup(format!(
                "vocabulary maps '{word}' to the reserved unknown id 0"
            )));
        }
        let max_id = word_index.values().copied().max().unwrap_or(0) as usize;
        let bound = word_index.len() * SPARSE_ID_FACTOR + SPARSE_ID_SLACK;
        if max_id > bound {
            return Err(EngineError::startup(format!(
                "vocabulary id {max_id} is far beyond its {} entries (limit {bound})",
                word_index.len()
            )));
        }
        let size = max_id + 1;
        let mut tokens = vec![String::new(); size];
        for (word, &id) in word_index {
            tokens[id as usize] = word.clone();
        }
        let mut vocab = Self::from_tokens(tokens);
        vocab.index.retain(|token, _| !token.is_empty());
        Ok(vocab)
    }

    /// Restrict usable ids to `0..max_ids` (e.g. the embedding row count).
    pub fn with_limit(mut self, max_ids: usize) -> Self {
        self.limit = self.limit.min(max_ids as u32);
        self
    }

    /// Number of slots in the table, including the reserved id 0.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Ids a lookup can actually return (after any limit).
    pub fn usable_len(&self) -> usize {
        self.limit as usize
    }

    pub fn id_of(&self, token: &str) -> u32 {
        match self.index.get(token) {
            Some(&id) if id < self.limit => id,
            _ => UNKNOWN_ID,
        }
    }

    pub fn token_of(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Map every token to its id, 0 for anything unknown.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens.iter().map(|t| self.id_of(t.as_ref())).collect()
    }
}

/// Fit an id sequence to exactly `max_len` entries.
///
/// Long sequences keep their last `max_len` ids (truncated from the start);
/// short ones are zero-padded at the start.
pub fn pad_sequence(ids: &[u32], max_len: usize) -> Vec<u32> {
    if ids.len() >= max_len {
        return ids[ids.len() - max_len..].to_vec();
    }
    let mut padded = vec![UNKNOWN_ID; max_len - ids.len()];
    padded.extend_from_slice(ids);
    padded
}
