use rust_stemmers::{Algorithm, Stemmer};
use stop_words::LANGUAGE;

/// Identity of the text analysis in this module, persisted in every
/// segment sidecar. Indexing and querying must agree on it or recall
/// degrades silently, so readers refuse to score against a segment that
/// carries a different tag.
pub const ANALYZER_ID: &str = "english-snowball-v1";

/// A simple lexer for tokenizing text. It emits numeric and alphabetic
/// tokens, applies English stemming to alphabetic tokens, and drops
/// punctuation and other symbols.
pub struct Lexer<'a> {
    /// The input text as a slice of characters.
    input: &'a [char],
    stemmer: Stemmer,
}

impl<'a> Lexer<'a> {
    /// Creates a new `Lexer` instance.
    ///
    /// # Arguments
    /// * `input` - The input text as a slice of characters.
    pub fn new(input: &'a [char]) -> Self {
        Self {
            input,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Skips characters that never start a token: whitespace, punctuation
    /// and any other symbol.
    fn trim_left(&mut self) {
        while !self.input.is_empty() && !self.input[0].is_alphanumeric() {
            self.input = &self.input[1..];
        }
    }

    /// Chops `n` characters from the beginning of the input and returns
    /// them as a slice.
    ///
    /// # Arguments
    /// * `n` - The number of characters to chop.
    ///
    /// # Returns
    /// A slice of characters representing the chopped token.
    fn chop(&mut self, n: usize) -> &'a [char] {
        let token = &self.input[0..n];
        self.input = &self.input[n..];
        token
    }

    /// Chops characters from the input while a given predicate remains
    /// true.
    ///
    /// # Arguments
    /// * `predicate` - A closure that takes a character and returns `true`
    ///   if it should be included.
    ///
    /// # Returns
    /// A slice of characters representing the chopped token.
    fn chop_while<P>(&mut self, mut predicate: P) -> &'a [char]
    where
        P: FnMut(&char) -> bool,
    {
        let mut n = 0;
        while n < self.input.len() && predicate(&self.input[n]) {
            n += 1;
        }

        self.chop(n)
    }

    /// Extracts the next token from the input: a run of digits, or a run
    /// of alphanumeric characters starting with a letter, stemmed.
    ///
    /// # Returns
    /// An `Option` containing the next token as a `String`, or `None` if
    /// no more tokens are available.
    fn next_token(&mut self) -> Option<String> {
        self.trim_left();

        if self.input.is_empty() {
            return None;
        }

        if self.input[0].is_numeric() {
            return Some(self.chop_while(|x| x.is_numeric()).iter().collect());
        }

        let term: String = self.chop_while(|x| x.is_alphanumeric()).iter().collect();
        Some(self.stemmer.stem(&term).to_string())
    }

    /// Retrieves all tokens from the input, applying stemming and removing
    /// specified stop words.
    ///
    /// # Arguments
    /// * `stop_words` - A slice of `String`s representing words to be
    ///   filtered out.
    ///
    /// # Returns
    /// A `Vec` of processed tokens as `String`s.
    pub fn get_tokens(&mut self, stop_words: &[String]) -> Vec<String> {
        let mut tokens = Vec::new();
        for token in self.by_ref() {
            tokens.push(token);
        }

        self.remove_stop_words(&mut tokens, stop_words);
        tokens
    }

    /// Removes specified stop words from a mutable vector of tokens.
    ///
    /// # Arguments
    /// * `tokens` - A mutable reference to the `Vec<String>` of tokens.
    /// * `stop_words` - A slice of `String`s representing stop words.
    fn remove_stop_words(&self, tokens: &mut Vec<String>, stop_words: &[String]) {
        tokens.retain(|t| !stop_words.contains(t));
    }
}

impl Iterator for Lexer<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Runs the full analysis chain over a piece of text: lowercase, tokenize,
/// stem, drop stop words. The same function serves indexing and query
/// parsing, which is what keeps the two sides consistent.
pub fn analyze(text: &str) -> Vec<String> {
    let stop_words = stop_words::get(LANGUAGE::English);
    let chars = text.to_lowercase().chars().collect::<Vec<char>>();
    let mut lexer = Lexer::new(&chars);
    lexer.get_tokens(&stop_words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_punctuation_and_stop_words() {
        let tokens = analyze("The patient's fever, and chills!");
        assert!(!tokens.iter().any(|t| t.chars().any(|c| !c.is_alphanumeric())));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
        assert!(tokens.contains(&"fever".to_string()));
    }

    #[test]
    fn stems_english_words() {
        let tokens = analyze("running runner runs");
        assert!(tokens.iter().all(|t| t.starts_with("run")));
    }

    #[test]
    fn lowercases_before_tokenizing() {
        assert_eq!(analyze("Fever FEVER fever"), vec!["fever", "fever", "fever"]);
    }

    #[test]
    fn keeps_numeric_tokens() {
        let tokens = analyze("dose 500 mg");
        assert!(tokens.contains(&"500".to_string()));
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(analyze("").is_empty());
        assert!(analyze("... !!! ---").is_empty());
    }

    #[test]
    fn analysis_is_stable() {
        let text = "Chronic obstructive pulmonary disease worsens over time.";
        assert_eq!(analyze(text), analyze(text));
    }
}
