// Text handling: everything that happens before tensors.
//
// Tokenization and vocabulary lookup produce the id sequences the encoder
// consumes; the feature extractor produces the two lexical features the
// fusion head reads alongside them.

pub mod features;
pub mod tokenizer;
pub mod vocab;

/// Drop words that look like mentions or links.
///
/// Social-media text is full of `@handles` and URLs that the models never saw
/// during training. Any whitespace-separated word containing `@` or `http` is
/// removed and the rest is re-joined with single spaces.
pub fn strip_mentions_and_links(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !word.contains('@') && !word.contains("http"))
        .collect::<Vec<_>>()
        .join(" ")
}
