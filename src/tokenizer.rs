//! Quote- and escape-aware character tokenizer for tree text.
//!
//! The tokenizer reads one significant character at a time from a [`CharSource`].
//! Outside quotes whitespace is skipped. A backslash escapes exactly the next
//! character. Single or double quotes suppress structural interpretation until the
//! matching unescaped quote. The quoting and escaping state lives in a small
//! [`TokenizerState`] that the caller owns and passes by `&mut`, so a parser can
//! resume tokenizing exactly where it left off.
//!
//! # Example
//! ```
//! # use treenode::tokenizer::{StrSource, TokenizerState, next_token};
//! let mut source = StrSource::new("'a,b' ,c");
//! let mut state = TokenizerState::default();
//! let structural: Vec<char> = std::iter::from_fn(|| next_token(&mut source, &mut state))
//!     .filter(|t| t.is_structural())
//!     .map(|t| t.ch)
//!     .collect();
//! assert_eq!(structural, vec![',', 'c']);
//! ```

use std::io::{self, BufRead};

// =#========================================================================#=
// CHAR SOURCE
// =#========================================================================#=
/// Sequential character input with one character of look-ahead.
pub trait CharSource {
    fn peek(&mut self) -> Option<char>;

    /// Consumes and returns the current character.
    fn next_char(&mut self) -> Option<char>;

    /// Byte offset of the current character.
    fn position(&self) -> usize;
}

/// Character source over an in-memory string.
#[derive(Debug, Clone)]
pub struct StrSource<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> StrSource<'a> {
    pub fn new(text: &'a str) -> Self {
        StrSource { text, offset: 0 }
    }

    /// The not yet consumed remainder of the text.
    pub fn rest(&self) -> &'a str {
        &self.text[self.offset..]
    }

    pub fn text(&self) -> &'a str {
        self.text
    }
}

impl CharSource for StrSource<'_> {
    fn peek(&mut self) -> Option<char> {
        self.text[self.offset..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    fn position(&self) -> usize {
        self.offset
    }
}

/// Character source streaming from a buffered reader, one line at a time.
///
/// Read errors end the character stream; the error is kept and can be taken with
/// [`ReaderSource::take_error`].
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    line: String,
    cursor: usize,
    consumed: usize,
    error: Option<io::Error>,
    exhausted: bool,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        ReaderSource {
            reader,
            line: String::new(),
            cursor: 0,
            consumed: 0,
            error: None,
            exhausted: false,
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn fill(&mut self) -> bool {
        while self.cursor >= self.line.len() {
            if self.exhausted {
                return false;
            }
            self.consumed += self.line.len();
            self.line.clear();
            self.cursor = 0;
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.exhausted = true;
                    return false;
                }
                Ok(_) => {}
                Err(e) => {
                    self.error = Some(e);
                    self.exhausted = true;
                    return false;
                }
            }
        }
        true
    }
}

impl<R: BufRead> CharSource for ReaderSource<R> {
    fn peek(&mut self) -> Option<char> {
        if !self.fill() {
            return None;
        }
        self.line[self.cursor..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.cursor += ch.len_utf8();
        Some(ch)
    }

    fn position(&self) -> usize {
        self.consumed + self.cursor
    }
}

// =#========================================================================#=
// TOKENS
// =#========================================================================#=
/// Quoting and escaping state carried between calls to [`next_token`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenizerState {
    /// The previous character was an unescaped backslash.
    pub escaping: bool,
    pub open_single_quote: bool,
    pub open_double_quote: bool,
}

impl TokenizerState {
    pub fn in_quotes(&self) -> bool {
        self.open_single_quote || self.open_double_quote
    }
}

/// One significant character and how it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub ch: char,
    /// Preceded by an unescaped backslash.
    pub escaped: bool,
    /// An unescaped backslash that escapes the following character.
    pub escape_mark: bool,
    /// Inside quotes, or one of the quotes delimiting them.
    pub quoted: bool,
    /// The opening or closing quote of a quoted run.
    pub quote_mark: bool,
}

impl Token {
    /// True when the character can act as a delimiter.
    pub fn is_structural(&self) -> bool {
        !self.escaped && !self.escape_mark && !self.quoted
    }
}

/// Reads the next significant character, updating `state`.
///
/// Returns `None` at the end of the input.
pub fn next_token<S: CharSource + ?Sized>(
    source: &mut S,
    state: &mut TokenizerState,
) -> Option<Token> {
    loop {
        let ch = source.next_char()?;
        if !state.in_quotes() && !state.escaping && ch.is_whitespace() {
            continue;
        }

        if state.escaping {
            state.escaping = false;
            return Some(Token {
                ch,
                escaped: true,
                escape_mark: false,
                quoted: state.in_quotes(),
                quote_mark: false,
            });
        }

        let mut token = Token {
            ch,
            escaped: false,
            escape_mark: false,
            quoted: state.in_quotes(),
            quote_mark: false,
        };
        match ch {
            '\\' => {
                state.escaping = true;
                token.escape_mark = true;
            }
            '\'' if !state.open_double_quote => {
                state.open_single_quote = !state.open_single_quote;
                token.quoted = true;
                token.quote_mark = true;
            }
            '"' if !state.open_single_quote => {
                state.open_double_quote = !state.open_double_quote;
                token.quoted = true;
                token.quote_mark = true;
            }
            _ => {}
        }
        return Some(token);
    }
}

/// True for characters that end a word and form a word of their own.
pub fn is_word_delimiter(ch: char) -> bool {
    matches!(ch, '[' | ']' | ',' | ';')
}

/// Reads the next whitespace- or delimiter-separated word.
///
/// Leading whitespace is skipped. A delimiter (`[`, `]`, `,` or `;`) is returned
/// as a word of its own. Returns `None` at the end of the input.
pub fn next_word<S: CharSource + ?Sized>(source: &mut S) -> Option<String> {
    while source.peek()?.is_whitespace() {
        source.next_char();
    }
    let first = source.next_char()?;
    let mut word = String::from(first);
    if is_word_delimiter(first) {
        return Some(word);
    }
    while let Some(ch) = source.peek() {
        if ch.is_whitespace() || is_word_delimiter(ch) {
            break;
        }
        word.push(ch);
        source.next_char();
    }
    Some(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens(text: &str) -> Vec<Token> {
        let mut source = StrSource::new(text);
        let mut state = TokenizerState::default();
        std::iter::from_fn(|| next_token(&mut source, &mut state)).collect()
    }

    fn structural(text: &str) -> String {
        tokens(text)
            .into_iter()
            .filter(Token::is_structural)
            .map(|t| t.ch)
            .collect()
    }

    #[test]
    fn whitespace_skipped_outside_quotes_only() {
        let chars: String = tokens("a b 'c d'").into_iter().map(|t| t.ch).collect();
        assert_eq!(chars, "ab'c d'");
    }

    #[test]
    fn quoted_comma_is_not_structural() {
        assert_eq!(structural("'a,b'"), "");
        assert_eq!(structural("\"a,b\""), "");
        assert_eq!(structural("x,'a,b',y"), "x,,y");
    }

    #[test]
    fn escaped_comma_is_not_structural() {
        assert_eq!(structural("a\\,b"), "ab");
        let t = tokens("a\\,b");
        assert!(t[1].escape_mark);
        assert!(t[2].escaped);
        assert_eq!(t[2].ch, ',');
    }

    #[test]
    fn other_quote_inside_quotes_is_literal() {
        let t = tokens("'it\"s'");
        assert!(t.iter().all(|t| t.quoted));
        assert_eq!(t.iter().filter(|t| t.quote_mark).count(), 2);

        let t = tokens("'O\\'Brien'");
        assert_eq!(t.iter().filter(|t| t.quote_mark).count(), 2);
    }

    #[test]
    fn state_survives_between_calls() {
        let mut source = StrSource::new("'a, b', c");
        let mut state = TokenizerState::default();
        next_token(&mut source, &mut state);
        assert!(state.open_single_quote);
        let rest: String = std::iter::from_fn(|| next_token(&mut source, &mut state))
            .filter(Token::is_structural)
            .map(|t| t.ch)
            .collect();
        assert_eq!(rest, ",c");
        assert!(!state.in_quotes());
    }

    #[test]
    fn words_split_on_delimiters() {
        let mut source = StrSource::new("  begin trees;\n tree t1=[&R] (A,B);");
        let words: Vec<String> = std::iter::from_fn(|| next_word(&mut source)).collect();
        assert_eq!(
            words,
            vec!["begin", "trees", ";", "tree", "t1=", "[", "&R", "]", "(A", ",", "B)", ";"]
        );
    }

    #[test]
    fn reader_source_streams_lines() {
        let mut source = ReaderSource::new(Cursor::new("ab\ncd"));
        let mut state = TokenizerState::default();
        let text: String = std::iter::from_fn(|| next_token(&mut source, &mut state))
            .map(|t| t.ch)
            .collect();
        assert_eq!(text, "abcd");
        assert_eq!(source.position(), 5);
        assert!(source.take_error().is_none());
    }
}
