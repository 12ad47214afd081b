//! Key-value script text.
//!
//! Grammar:
//!
//! ```text
//! file  := pair*
//! pair  := token ( token | "{" pair* "}" )
//! token := "quoted text" | bare-word
//! ```
//!
//! `//` starts a comment that runs to the end of the line. Bracketed platform
//! conditionals (`[$WIN32]`) after a value are accepted and ignored. Keys are
//! matched case-insensitively and may repeat; repeated keys keep their order,
//! which is how a script lists several axles, gears or sound states.

use crate::error::ScriptError;
use nalgebra::Vector3;

#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Text(String),
    Block(Vec<KvPair>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvPair {
    pub key: String,
    pub value: KvValue,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Open,
    Close,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn syntax(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek().copied() {
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize)>, ScriptError> {
        loop {
            self.skip_trivia();
            let line = self.line;
            let Some(c) = self.chars.next() else {
                return Ok(None);
            };
            match c {
                '{' => return Ok(Some((Token::Open, line))),
                '}' => return Ok(Some((Token::Close, line))),
                '"' => {
                    let mut text = String::new();
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\n') => {
                                self.line += 1;
                                text.push('\n');
                            }
                            Some(c) => text.push(c),
                            None => return Err(self.syntax("unterminated quoted string")),
                        }
                    }
                    return Ok(Some((Token::Text(text), line)));
                }
                '[' => {
                    // platform conditional, dropped
                    loop {
                        match self.chars.next() {
                            Some(']') => break,
                            Some('\n') | None => {
                                return Err(self.syntax("unterminated conditional"));
                            }
                            Some(_) => {}
                        }
                    }
                }
                c => {
                    let mut text = String::from(c);
                    while let Some(&c) = self.chars.peek() {
                        if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                            break;
                        }
                        text.push(c);
                        self.chars.next();
                    }
                    return Ok(Some((Token::Text(text), line)));
                }
            }
        }
    }
}

/// Parse a whole script into its top-level pairs.
pub fn parse(text: &str) -> Result<Vec<KvPair>, ScriptError> {
    let mut lexer = Lexer::new(text);
    let mut stack: Vec<(String, Vec<KvPair>)> = Vec::new();
    let mut root: Vec<KvPair> = Vec::new();
    let mut pending_key: Option<String> = None;

    while let Some((token, line)) = lexer.next_token()? {
        match (token, pending_key.take()) {
            (Token::Text(key), None) => pending_key = Some(key),
            (Token::Text(value), Some(key)) => {
                let pair = KvPair {
                    key,
                    value: KvValue::Text(value),
                };
                match stack.last_mut() {
                    Some((_, children)) => children.push(pair),
                    None => root.push(pair),
                }
            }
            (Token::Open, Some(key)) => stack.push((key, Vec::new())),
            (Token::Open, None) => {
                return Err(ScriptError::Syntax {
                    line,
                    message: "block opened without a key".into(),
                });
            }
            (Token::Close, Some(key)) => {
                return Err(ScriptError::Syntax {
                    line,
                    message: format!("key \"{key}\" has no value"),
                });
            }
            (Token::Close, None) => {
                let Some((key, children)) = stack.pop() else {
                    return Err(ScriptError::Syntax {
                        line,
                        message: "unbalanced closing brace".into(),
                    });
                };
                let pair = KvPair {
                    key,
                    value: KvValue::Block(children),
                };
                match stack.last_mut() {
                    Some((_, siblings)) => siblings.push(pair),
                    None => root.push(pair),
                }
            }
        }
    }

    if let Some(key) = pending_key {
        return Err(lexer.syntax(format!("key \"{key}\" has no value")));
    }
    if let Some((key, _)) = stack.last() {
        return Err(lexer.syntax(format!("block \"{key}\" is never closed")));
    }
    Ok(root)
}

/// Read-only view over the children of one block.
#[derive(Debug, Clone, Copy)]
pub struct KvBlock<'a> {
    pairs: &'a [KvPair],
}

impl<'a> KvBlock<'a> {
    pub fn new(pairs: &'a [KvPair]) -> Self {
        Self { pairs }
    }

    pub fn pairs(self) -> &'a [KvPair] {
        self.pairs
    }

    /// First child block with this key.
    pub fn block(self, key: &str) -> Option<KvBlock<'a>> {
        self.blocks(key).next()
    }

    /// Every child block with this key, in script order.
    pub fn blocks<'k>(self, key: &'k str) -> impl Iterator<Item = KvBlock<'a>> + 'k
    where
        'a: 'k,
    {
        self.pairs.iter().filter_map(move |p| match &p.value {
            KvValue::Block(children) if p.key.eq_ignore_ascii_case(key) => {
                Some(KvBlock::new(children))
            }
            _ => None,
        })
    }

    /// First text value with this key.
    pub fn text(self, key: &str) -> Option<&'a str> {
        self.texts(key).next()
    }

    /// Every text value with this key, in script order.
    pub fn texts<'k>(self, key: &'k str) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.pairs.iter().filter_map(move |p| match &p.value {
            KvValue::Text(text) if p.key.eq_ignore_ascii_case(key) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn f32(self, key: &str) -> Result<Option<f32>, ScriptError> {
        self.text(key).map(|v| parse_f32(key, v)).transpose()
    }

    pub fn f32_or(self, key: &str, default: f32) -> Result<f32, ScriptError> {
        Ok(self.f32(key)?.unwrap_or(default))
    }

    pub fn bool_or(self, key: &str, default: bool) -> Result<bool, ScriptError> {
        Ok(self.f32(key)?.map_or(default, |v| v != 0.0))
    }

    pub fn vec3(self, key: &str) -> Result<Option<Vector3<f32>>, ScriptError> {
        self.text(key).map(|v| parse_vec3(key, v)).transpose()
    }
}

pub fn parse_f32(key: &str, value: &str) -> Result<f32, ScriptError> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| ScriptError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}

pub fn parse_vec3(key: &str, value: &str) -> Result<Vector3<f32>, ScriptError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ScriptError::InvalidVector {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(Vector3::new(
        parse_f32(key, parts[0])?,
        parse_f32(key, parts[1])?,
        parse_f32(key, parts[2])?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks_and_repeated_keys() {
        let text = r#"
            "vehicle"
            {
                "wheelsperaxle" "2"   // trailing comment
                axle { "torquefactor" "1.0" }
                axle { "torquefactor" "0.5" }
            }
        "#;
        let root = parse(text).unwrap();
        assert_eq!(root.len(), 1);
        let vehicle = KvBlock::new(&root).block("VEHICLE").unwrap();
        assert_eq!(vehicle.text("wheelsperaxle"), Some("2"));
        let factors: Vec<f32> = vehicle
            .blocks("axle")
            .map(|a| a.f32_or("torquefactor", 0.0).unwrap())
            .collect();
        assert_eq!(factors, vec![1.0, 0.5]);
    }

    #[test]
    fn conditionals_are_ignored() {
        let root = parse(r#""a" "1" [$X360] "b" "2""#).unwrap();
        let block = KvBlock::new(&root);
        assert_eq!(block.text("a"), Some("1"));
        assert_eq!(block.text("b"), Some("2"));
    }

    #[test]
    fn vector_values() {
        let root = parse(r#""massCenterOverride" "0 -0.2 0.5""#).unwrap();
        let v = KvBlock::new(&root).vec3("masscenteroverride").unwrap().unwrap();
        assert_eq!(v, Vector3::new(0.0, -0.2, 0.5));
    }

    #[test]
    fn unbalanced_braces_report_line() {
        let err = parse("\"a\"\n{\n\"b\" \"1\"\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));

        let err = parse("}\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 1, .. }));
    }

    #[test]
    fn bad_number_is_an_error() {
        let root = parse(r#""horsepower" "lots""#).unwrap();
        let err = KvBlock::new(&root).f32("horsepower").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidNumber { .. }));
    }
}
