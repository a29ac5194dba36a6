// Tokenizer contract.
//
// Capsule-attention models were trained on lowercased text with punctuation
// stripped and split on whitespace (`WordTokenizer`). Pooling models were
// trained on rule-based tokens that keep punctuation and mark case and
// repetition with special tokens (`RuleTokenizer`). Each category picks one
// through its model config; the engine only ever sees Vec<String>.

use serde::{Deserialize, Serialize};

/// Characters replaced by whitespace before splitting. Apostrophes are kept so
/// contractions ("don't") survive as one token.
pub const DEFAULT_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

/// Splits text into the tokens the vocabulary is keyed by.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Lowercasing word tokenizer with a character filter set.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pub filters: Vec<char>,
    pub lowercase: bool,
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self {
            filters: DEFAULT_FILTERS.chars().collect(),
            lowercase: true,
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let text = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };

        let cleaned: String = text
            .chars()
            .map(|c| if self.filters.contains(&c) { ' ' } else { c })
            .collect();

        cleaned.split_whitespace().map(str::to_string).collect()
    }
}

/// Marks the next token as capitalized in the source text.
pub const TK_MAJ: &str = "xxmaj";
/// Marks the next token as all-caps in the source text.
pub const TK_UP: &str = "xxup";
/// `xxrep <n> <char>`: a character repeated `n` times.
pub const TK_REP: &str = "xxrep";
/// `xxwrep <n> <word>`: a word repeated `n` times in a row.
pub const TK_WREP: &str = "xxwrep";

/// Runs shorter than this are left alone.
const MIN_REPEAT: usize = 4;

/// Rule-based tokenizer for the pooling models.
///
/// Words are runs of alphanumerics and apostrophes; every other visible
/// character is a token of its own. Tokens are lowercased, with `xxup` before
/// all-caps words and `xxmaj` before capitalized ones. Runs of 4+ identical
/// characters collapse to `xxrep n c`, and 4+ identical words in a row to
/// `xxwrep n w`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTokenizer;

impl RuleTokenizer {
    fn split(text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let run = chars[i..].iter().take_while(|&&x| x == c).count();

            if run >= MIN_REPEAT && !c.is_whitespace() {
                flush(&mut word, &mut tokens);
                tokens.push(TK_REP.to_string());
                tokens.push(run.to_string());
                tokens.push(c.to_string());
                i += run;
                continue;
            }

            if c.is_alphanumeric() || c == '\'' {
                word.push(c);
            } else {
                flush(&mut word, &mut tokens);
                if !c.is_whitespace() {
                    tokens.push(c.to_string());
                }
            }
            i += 1;
        }
        flush(&mut word, &mut tokens);
        tokens
    }

    /// Lowercase every token, inserting case markers before words that had any.
    fn mark_case(tokens: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            let mut chars = token.chars();
            let first = chars.next();
            let rest: String = chars.collect();
            if token.chars().count() > 1 && is_all_upper(&token) {
                out.push(TK_UP.to_string());
            } else if first.is_some_and(char::is_uppercase) && is_all_lower(&rest) {
                out.push(TK_MAJ.to_string());
            }
            out.push(token.to_lowercase());
        }
        out
    }

    /// Collapse runs of the same word into `xxwrep n word`.
    fn mark_word_repeats(tokens: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let run = tokens[i..].iter().take_while(|t| **t == tokens[i]).count();
            let is_word = tokens[i].chars().any(char::is_alphanumeric);
            if run >= MIN_REPEAT && is_word {
                out.push(TK_WREP.to_string());
                out.push(run.to_string());
                out.push(tokens[i].clone());
            } else {
                out.extend(tokens[i..i + run].iter().cloned());
            }
            i += run;
        }
        out
    }
}

fn flush(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

/// Has a cased character and no lowercase ones.
fn is_all_upper(s: &str) -> bool {
    s.chars().any(|c| c.is_uppercase()) && !s.chars().any(|c| c.is_lowercase())
}

/// Has a cased character and no uppercase ones.
fn is_all_lower(s: &str) -> bool {
    s.chars().any(|c| c.is_lowercase()) && !s.chars().any(|c| c.is_uppercase())
}

impl Tokenizer for RuleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        Self::mark_case(Self::mark_word_repeats(Self::split(text)))
    }
}

/// Which built-in tokenizer a category model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    Word,
    Rules,
}

impl TokenizerKind {
    pub fn build(self) -> Box<dyn Tokenizer> {
        match self {
            TokenizerKind::Word => Box::new(WordTokenizer::default()),
            TokenizerKind::Rules => Box::new(RuleTokenizer),
        }
    }
}
