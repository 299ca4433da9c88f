//! Parser for Valve-style nested text key-value documents.
//!
//! The format is what Steam uses for `libraryfolders.vdf`, `loginusers.vdf`
//! and the per-app `appmanifest_*.acf` files:
//!
//! ```text
//! "AppState"
//! {
//!     "appid"     "440"
//!     "name"      "Team Fortress 2"
//! }
//! ```
//!
//! Parsing never fails. These files belong to a third-party installation, so
//! malformed input degrades to a partial (possibly empty) tree and callers treat
//! absent or wrong-typed fields as "not present".

/// A value in a key-value document: either a scalar string or a nested map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValueNode {
    String(String),
    Map(KeyValueMap),
}

impl KeyValueNode {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValueNode::String(s) => Some(s),
            KeyValueNode::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&KeyValueMap> {
        match self {
            KeyValueNode::Map(m) => Some(m),
            KeyValueNode::String(_) => None,
        }
    }
}

/// Insertion-ordered map. A repeated key replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueMap {
    entries: Vec<(String, KeyValueNode)>,
}

impl KeyValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: KeyValueNode) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&KeyValueNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the first key from `keys` that is present.
    pub fn get_any(&self, keys: &[&str]) -> Option<&KeyValueNode> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(KeyValueNode::as_str)
    }

    pub fn get_map(&self, key: &str) -> Option<&KeyValueMap> {
        self.get(key).and_then(KeyValueNode::as_map)
    }

    /// Parses a scalar as an unsigned integer; missing, nested or non-numeric
    /// values all come back as `None`.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyValueNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Text(String),
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_insignificant(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() || *c == '\u{feff}' => {
                    self.chars.next();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() != Some(&'/') {
                        return;
                    }
                    for c in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn quoted(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '"' => return out,
                '\\' => match self.chars.peek().copied() {
                    Some('n') => {
                        self.chars.next();
                        out.push('\n');
                    }
                    Some('t') => {
                        self.chars.next();
                        out.push('\t');
                    }
                    Some('"') => {
                        self.chars.next();
                        out.push('"');
                    }
                    Some('\\') => {
                        self.chars.next();
                        out.push('\\');
                    }
                    _ => out.push('\\'),
                },
                other => out.push(other),
            }
        }
        // Unterminated string runs to end of input.
        out
    }

    fn bare(&mut self, first: char) -> String {
        let mut out = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '"' || c == '{' || c == '}' {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.skip_insignificant();
        let c = self.chars.next()?;
        Some(match c {
            '{' => Token::Open,
            '}' => Token::Close,
            '"' => Token::Text(self.quoted()),
            other => Token::Text(self.bare(other)),
        })
    }
}

/// Parses a whole document into its root map.
pub fn parse(input: &str) -> KeyValueMap {
    let mut tokens = Tokenizer::new(input);
    let mut root = KeyValueMap::new();
    // Stray closing braces at the top level are skipped rather than ending
    // the document early.
    while parse_map_body(&mut tokens, &mut root) == MapEnd::Closed {}
    root
}

#[derive(Debug, PartialEq)]
enum MapEnd {
    Closed,
    EndOfInput,
}

fn parse_map_body(tokens: &mut Tokenizer<'_>, map: &mut KeyValueMap) -> MapEnd {
    loop {
        let key = match tokens.next() {
            None => return MapEnd::EndOfInput,
            Some(Token::Close) => return MapEnd::Closed,
            Some(Token::Open) => {
                // A map without a key has nowhere to live; consume and drop it.
                let mut orphan = KeyValueMap::new();
                if parse_map_body(tokens, &mut orphan) == MapEnd::EndOfInput {
                    return MapEnd::EndOfInput;
                }
                continue;
            }
            Some(Token::Text(key)) => key,
        };

        match tokens.next() {
            None => return MapEnd::EndOfInput,
            Some(Token::Close) => return MapEnd::Closed,
            Some(Token::Text(value)) => map.insert(key, KeyValueNode::String(value)),
            Some(Token::Open) => {
                let mut child = KeyValueMap::new();
                let end = parse_map_body(tokens, &mut child);
                map.insert(key, KeyValueNode::Map(child));
                if end == MapEnd::EndOfInput {
                    return MapEnd::EndOfInput;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/keyvalue_tests.rs"]
mod tests;
